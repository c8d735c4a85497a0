//! Shared service lifecycle (§4.1, §5). Every long-running service in the
//! engine (Name Service, DNS Service, Data Manager, ...) embeds a
//! [`ServiceBase`] and drives its own loop around it, the same way the
//! teacher's UDP/TCP servers loop around a listening socket and a shared
//! `stop` flag (`shared::net::udp_server::start_udp_server`) — generalized
//! here away from sockets to generic request channels, and from a single
//! stop flag to the quit/pause/resume triple the driver needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::model::{AddrRequest, AsnRequest, DnsRequest};

/// One inbound request queue per kind a service might need to drain.
/// Services that don't use a given kind simply never construct its sender.
pub struct Inboxes {
    pub dns: Receiver<DnsRequest>,
    pub addr: Receiver<AddrRequest>,
    pub asn: Receiver<AsnRequest>,
    pub whois: Receiver<AsnRequest>,
}

pub struct Outboxes {
    pub dns: Sender<DnsRequest>,
    pub addr: Sender<AddrRequest>,
    pub asn: Sender<AsnRequest>,
    pub whois: Sender<AsnRequest>,
}

pub fn new_channels() -> (Outboxes, Inboxes) {
    let (dns_tx, dns_rx) = mpsc::channel();
    let (addr_tx, addr_rx) = mpsc::channel();
    let (asn_tx, asn_rx) = mpsc::channel();
    let (whois_tx, whois_rx) = mpsc::channel();
    (
        Outboxes { dns: dns_tx, addr: addr_tx, asn: asn_tx, whois: whois_tx },
        Inboxes { dns: dns_rx, addr: addr_rx, asn: asn_rx, whois: whois_rx },
    )
}

/// `Quit` is closed exactly once to broadcast shutdown; `pause`/`resume`
/// are a paired signal a service's loop blocks on between `PauseChan` and
/// `ResumeChan` receipts, as described in §4.1.
pub struct Control {
    quit: Receiver<()>,
    pause: Receiver<()>,
    resume: Receiver<()>,
}

pub struct ControlHandle {
    pub quit: Sender<()>,
    pub pause: Sender<()>,
    pub resume: Sender<()>,
}

pub fn new_control() -> (ControlHandle, Control) {
    let (quit_tx, quit_rx) = mpsc::channel();
    let (pause_tx, pause_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();
    (
        ControlHandle { quit: quit_tx, pause: pause_tx, resume: resume_tx },
        Control { quit: quit_rx, pause: pause_rx, resume: resume_rx },
    )
}

/// Lifecycle state embedded in every service. `active` is a monotonic
/// "touched since last check" flag rather than a timestamp: the driver's
/// termination poll only ever needs a boolean per 2-second tick (§7), so a
/// flag avoids clock reads on every handler invocation.
pub struct ServiceBase {
    name: &'static str,
    active: Arc<AtomicBool>,
    control: Control,
}

impl ServiceBase {
    pub fn new(name: &'static str, control: Control) -> Self {
        ServiceBase { name, active: Arc::new(AtomicBool::new(false)), control }
    }

    /// Cheap handle a service hands to its own worker closures so they can
    /// call [`ActiveFlag::set_active`] without holding a reference to the
    /// whole `ServiceBase`.
    pub fn active_flag(&self) -> ActiveFlag {
        ActiveFlag(self.active.clone())
    }

    /// Read and clear the flag in one step, exactly what the driver's
    /// termination poll needs: "has anything happened since I last asked?"
    pub fn is_active(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Block until either quit is signalled (returns `false`) or a pause is
    /// requested, in which case block again on resume before returning
    /// `true`. Call this at the top of each loop iteration.
    pub fn check_quit_and_pause(&self) -> bool {
        if self.control.quit.try_recv().is_ok() {
            log::info!("[{}] quit signal received, shutting down", self.name);
            return false;
        }
        if self.control.pause.try_recv().is_ok() {
            log::debug!("[{}] paused", self.name);
            loop {
                if self.control.resume.recv_timeout(std::time::Duration::from_millis(200)).is_ok() {
                    log::debug!("[{}] resumed", self.name);
                    break;
                }
                if self.control.quit.try_recv().is_ok() {
                    log::info!("[{}] quit signal received while paused", self.name);
                    return false;
                }
            }
        }
        true
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Handle a worker thread uses to mark the owning service active. Cloning
/// is cheap (`Arc` clone), so every spawned worker can hold its own copy.
#[derive(Clone)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn set_active(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_active_reads_and_clears() {
        let (_ctrl, control) = new_control();
        let base = ServiceBase::new("test", control);
        assert!(!base.is_active());
        base.active_flag().set_active();
        assert!(base.is_active());
        assert!(!base.is_active());
    }

    #[test]
    fn quit_signal_stops_loop() {
        let (ctrl, control) = new_control();
        let base = ServiceBase::new("test", control);
        ctrl.quit.send(()).unwrap();
        assert!(!base.check_quit_and_pause());
    }
}

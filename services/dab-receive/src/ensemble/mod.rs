//! Decoded ensemble state
//!
//! Consumes the decoder's record stream and maintains the receiver's view
//! of the multiplex: its label, its service list and, once a service has
//! been activated, the dispatch of that service's payload units.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

/// Component type code advertised by services that carry IP datagrams.
pub const IP_DATAGRAM_COMPONENT: u8 = 59;

/// How long `update` waits for a record before handing control back, so a
/// stop request is seen within one loop iteration.
const UPDATE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Audio,
    Data,
}

/// One service as described by the multiplex configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: u32,
    pub kind: ServiceKind,
    /// Payload type code of the primary service component.
    pub component_type: u8,
}

/// One unit of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsembleRecord {
    Ensemble { id: u16, label: String },
    Service(ServiceInfo),
    /// The multiplex description is structurally complete.
    Complete,
    Data { service: u32, payload: Vec<u8> },
}

/// Callback bound to an activated service.
pub type ServiceHandler = Box<dyn FnMut(Vec<u8>) + Send>;

/// The receiver's view of one ensemble.
pub struct Ensemble {
    records: Receiver<EnsembleRecord>,
    id: Option<u16>,
    label: Option<String>,
    services: Vec<ServiceInfo>,
    complete: bool,
    active: Option<(u32, ServiceHandler)>,
    activated: bool,
}

impl Ensemble {
    pub fn new(records: Receiver<EnsembleRecord>) -> Self {
        Self {
            records,
            id: None,
            label: None,
            services: Vec::new(),
            complete: false,
            active: None,
            activated: false,
        }
    }

    /// Whether the multiplex description has been fully acquired.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Pull and apply at most one record.
    ///
    /// Returns `false` once the record stream has ended; a quiet stream
    /// returns `true` after a short poll so the caller can check its stop
    /// condition between iterations.
    pub fn update(&mut self) -> bool {
        match self.records.recv_timeout(UPDATE_POLL) {
            Ok(record) => {
                self.apply(record);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Bind a handler to one service's payload units.
    ///
    /// Only the first activation of the process takes effect; the flag is
    /// never cleared, so a rebuilt service list cannot rebind.
    pub fn activate(&mut self, service: u32, handler: ServiceHandler) {
        if self.activated {
            debug!("service 0x{service:08x} activation ignored, already activated");
            return;
        }
        self.activated = true;
        self.active = Some((service, handler));
        info!("activated service 0x{service:08x}");
    }

    fn apply(&mut self, record: EnsembleRecord) {
        match record {
            EnsembleRecord::Ensemble { id, label } => {
                self.id = Some(id);
                self.label = Some(label);
            }
            EnsembleRecord::Service(service) => {
                match self.services.iter_mut().find(|known| known.id == service.id) {
                    Some(known) => *known = service,
                    None => self.services.push(service),
                }
            }
            EnsembleRecord::Complete => {
                if !self.complete {
                    self.complete = true;
                    info!(
                        "ensemble {} (0x{:04x}) acquired with {} services",
                        self.label.as_deref().unwrap_or("<unlabeled>"),
                        self.id.unwrap_or(0),
                        self.services.len()
                    );
                }
            }
            EnsembleRecord::Data { service, payload } => {
                if let Some((active, handler)) = self.active.as_mut() {
                    if *active == service {
                        handler(payload);
                    }
                }
            }
        }
    }
}

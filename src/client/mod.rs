//! Client side: status cache, poller, webhook receiver and the arbiter that
//! races them.

mod api;
mod arbiter;
mod phase;
mod poller;
mod race;
mod receiver;

pub use api::{HttpStatusApi, StatusApi};
pub use arbiter::{
    Arbiter, ArbiterSettings, BackgroundTask, RegistrationPolicy, TaskSpawner, TokioSpawner,
};
pub use phase::{PhaseError, PhaseTracker, Resolution, ResolutionPhase};
pub use poller::{PollSchedule, Poller};
pub use race::{Detection, DetectionSource, ResultSlot, Ticket};
pub use receiver::{ReceiverHandle, WebhookReceiver, webhook_router};

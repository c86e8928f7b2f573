pub mod audit;
pub mod channel;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod keywords;
pub mod notifications;
pub mod patch;
pub mod ports;
pub mod qualification;
pub mod scheduling;

pub use channel::{can_receive_sms, select_follow_up_path, FollowUpPath, LineType};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::business::{Business, BusinessId, Service, ServiceId};
pub use domain::conversation::{Channel, Conversation, ConversationId, ConversationStatus};
pub use domain::lead::{Lead, LeadId, LeadSource, LeadStatus, Urgency};
pub use domain::scheduled::{ActionKind, ActionState, ScheduledAction, ScheduledActionId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ConversationFlow, FlowAction, FlowContext, FlowEngine, FlowEvent};
pub use notifications::{NotificationEvent, NotificationPrefs};
pub use ports::IntegrationError;

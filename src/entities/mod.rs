pub mod api_token;
pub mod device_session;
pub mod job_execution;
pub mod security_event;
pub mod session;
pub mod user;

pub use api_token::Entity as ApiToken;
pub use device_session::Entity as DeviceSession;
pub use job_execution::Entity as JobExecution;
pub use security_event::Entity as SecurityEvent;
pub use session::Entity as Session;
pub use user::Entity as User;

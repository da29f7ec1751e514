pub mod entry;
pub mod retention;
pub mod subsystem;

pub use entry::{ErrorInfo, LogEntry, RequestData, UserAgentInfo};
pub use subsystem::{LogClass, LoggerEvent, SubsystemConfig, SubsystemLogger, SubsystemStats};

pub mod backup;
pub mod drill;
pub mod logging;
pub mod notification;
pub mod restore;
pub mod retention;

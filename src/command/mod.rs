pub mod backup;
pub mod rebuild;
pub mod report;
pub mod restore;
pub mod verify;

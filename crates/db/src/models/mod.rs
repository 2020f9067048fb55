pub mod alert;

pub use alert::AlertRow;

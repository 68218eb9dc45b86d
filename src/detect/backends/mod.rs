pub mod prelabeled;
pub mod text;

pub use prelabeled::PrelabeledBackend;
pub use text::TextBackend;

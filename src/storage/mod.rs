pub mod disk;
pub mod proof;

pub use disk::DiskFileStore;
pub use proof::DigestProofBuilder;

//! Buyer/datacenter context and the collaborator seams the engine reads
//! shared state through.
//!
//! Everything here is either immutable after construction or swapped
//! wholesale by a refresher; request handling only ever clones an `Arc`.

pub mod buyer;
pub mod directory;
pub mod locator;
pub mod magic;

pub use buyer::{Buyer, Datacenter};
pub use directory::{BuyerLookup, DatacenterLookup, Directory, DirectoryData, SnapshotCell};
pub use locator::{Locator, StaticLocator};
pub use magic::{MagicSource, RotatingMagic};

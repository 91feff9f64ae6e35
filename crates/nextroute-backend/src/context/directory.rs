//! Copy-on-refresh snapshots and the buyer/datacenter directory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use nextroute_core::error::Result;

use super::buyer::{Buyer, Datacenter};
use crate::config::BackendConfig;

/// Holds an immutable `Arc<T>` that a refresher swaps wholesale.
/// Readers take the lock only long enough to clone the pointer.
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn store(&self, value: T) {
        let next = Arc::new(value);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

pub trait BuyerLookup: Send + Sync {
    fn lookup_buyer(&self, buyer_id: u64) -> Option<Arc<Buyer>>;
}

pub trait DatacenterLookup: Send + Sync {
    fn lookup_datacenter(&self, datacenter_id: u64) -> Option<Arc<Datacenter>>;
}

/// One consistent view of buyers and datacenters.
#[derive(Default)]
pub struct DirectoryData {
    buyers: HashMap<u64, Arc<Buyer>>,
    datacenters: HashMap<u64, Arc<Datacenter>>,
}

impl DirectoryData {
    pub fn new(buyers: Vec<Buyer>, datacenters: Vec<Datacenter>) -> Self {
        Self {
            buyers: buyers.into_iter().map(|b| (b.id, Arc::new(b))).collect(),
            datacenters: datacenters
                .into_iter()
                .map(|d| (d.id, Arc::new(d)))
                .collect(),
        }
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        let buyers = cfg
            .buyers
            .iter()
            .map(Buyer::from_config)
            .collect::<Result<Vec<_>>>()?;
        let datacenters = cfg.datacenters.iter().map(Datacenter::from).collect();
        Ok(Self::new(buyers, datacenters))
    }

    pub fn buyer_count(&self) -> usize {
        self.buyers.len()
    }

    pub fn datacenter_count(&self) -> usize {
        self.datacenters.len()
    }
}

/// Buyer/datacenter directory backed by a [`SnapshotCell`].
#[derive(Default)]
pub struct Directory {
    cell: SnapshotCell<DirectoryData>,
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl Directory {
    pub fn new(data: DirectoryData) -> Self {
        Self {
            cell: SnapshotCell::new(data),
        }
    }

    /// Replace the whole directory at once.
    pub fn replace(&self, data: DirectoryData) {
        self.cell.store(data);
    }

    pub fn snapshot(&self) -> Arc<DirectoryData> {
        self.cell.load()
    }
}

impl BuyerLookup for Directory {
    fn lookup_buyer(&self, buyer_id: u64) -> Option<Arc<Buyer>> {
        self.cell.load().buyers.get(&buyer_id).cloned()
    }
}

impl DatacenterLookup for Directory {
    fn lookup_datacenter(&self, datacenter_id: u64) -> Option<Arc<Datacenter>> {
        self.cell.load().datacenters.get(&datacenter_id).cloned()
    }
}

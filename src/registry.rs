use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::descriptor::{Descriptor, DescriptorKind};
use crate::result::{Error, ErrorKind, Result};

fn registry() -> &'static RwLock<HashMap<String, Arc<Descriptor>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<Descriptor>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Publish a descriptor under its name. The table is append-only and meant
/// to be filled at startup; lookups after that never contend. SET
/// descriptors are refused here so the codec never meets one.
pub fn register_descriptor(desc: Arc<Descriptor>) -> Result<()> {
    if *desc.kind() == DescriptorKind::Set {
        return Err(Error::new(ErrorKind::NotImplemented("ASN.1 SET descriptors"), 0));
    }
    let mut table = registry().write().unwrap_or_else(|e| e.into_inner());
    table.insert(desc.name().clone(), desc);
    Ok(())
}

pub fn get_descriptor(name: &str) -> Option<Arc<Descriptor>> {
    let table = registry().read().unwrap_or_else(|e| e.into_inner());
    table.get(name).cloned()
}

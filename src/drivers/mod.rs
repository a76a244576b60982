//! Device drivers

pub mod virtio;

/// Bring up all drivers, logging what was found.
pub fn init() {
    if virtio::init().is_err() {
        crate::println!("drivers: no block device; abyssfs runs in-core");
    }
}

//! The session's configuration surface: plain data, constructed
//! programmatically by the caller. File/CLI/env parsing belongs to the
//! external client façade, not to this crate.

use ci_codec::identity::ManufacturerId;
use ci_codec::DeviceIdentity;
use ci_discovery::DiscoveryConfig;
use ci_route::VendorTable;
use ci_transaction::TransactionConfig;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub discovery: DiscoveryConfig,
    pub transaction: TransactionConfig,
    pub vendor_table: VendorTable,
    pub local_identity: DeviceIdentity,
    pub category_support: u8,
    /// Advertised in this session's own Discovery Inquiry/Reply. `0` means
    /// unlimited, matching the teacher's config table default.
    pub max_sysex_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            discovery: DiscoveryConfig::default(),
            transaction: TransactionConfig::default(),
            vendor_table: VendorTable::new(),
            local_identity: DeviceIdentity {
                manufacturer: ManufacturerId::Standard(0x7D),
                family: 0,
                model: 0,
                version: 0,
            },
            category_support: 0,
            max_sysex_size: 0,
        }
    }
}

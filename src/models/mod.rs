pub mod category;
pub mod manifest;
pub mod record;
pub mod sync_settings;

pub use category::{Category, Table};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_VERSION};
pub use record::Record;
pub use sync_settings::SyncSettings;

/// Application name used for configuration and data directories.
pub const APP_NAME: &str = "idstore";

/// Number of buckets a packer view spreads its items across unless configured otherwise.
pub const DEFAULT_BUCKET_COUNT: usize = 256;

/// Storage prefix for the group packer view.
pub const GROUP_BUCKETS_PREFIX: &str = "packer/group/";

/// Name of the configuration file within the config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "IDSTORE_CONFIG";

/// Environment variable overriding the storage directory.
pub const STORAGE_ENV: &str = "IDSTORE_STORAGE";

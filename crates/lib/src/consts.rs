/// Project manifest file name, looked up in the project folder.
pub const MANIFEST_FILENAME: &str = "weft.toml";

/// Directory (relative to the project folder) holding all build state.
pub const STATE_DIR: &str = ".weft";

/// Default intermediate directory name within [`STATE_DIR`].
pub const INTERMEDIATE_DIR: &str = "intermediate";

/// Cache store file name within the intermediate directory.
pub const CACHE_FILENAME: &str = "weft-cache.json";

/// Environment variable overriding the intermediate directory.
pub const INTERMEDIATE_DIR_ENV: &str = "WEFT_INTERMEDIATE_DIR";

/// Length of the truncated hash used for task identity keys.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Lock file name within the intermediate directory.
pub const LOCK_FILENAME: &str = ".weft.lock";

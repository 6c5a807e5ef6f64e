use serde_json::{json, Value};

pub const VERSION: &str = env!("BUILD_VERSION");

// Host used when binding chain endpoints and probing free ports
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

// Block rules
// Millis per second, it is used to prevent having random 1000 values anywhere
pub const MILLIS_PER_SECOND: u64 = 1000;

// Half a second per block, the pace of the chains this simulator imitates
pub const DEFAULT_BLOCK_INTERVAL_MS: u64 = 500;

// First block number of a chain when none is configured
pub const DEFAULT_START_BLOCK: u64 = 1;

// Number of blocks a chain produces when no end block is configured
pub const DEFAULT_BLOCK_RANGE: u64 = 1000;

// Upper bound on range size times segments for a generated history,
// 32 bytes per block so about 64 MB
pub const MAX_MATERIALIZED_BLOCKS: usize = 2_000_000;

// Distance between the head block and the last irreversible block
pub const IRREVERSIBLE_BLOCK_LAG: u64 = 3;

// Capacity of the per-chain broadcast channel feeding stream subscribers
pub const STREAM_CHANNEL_CAPACITY: usize = 1024;

// Mocking modules a chain engine knows how to initialize
pub const TOKEN_MODULE: &str = "token";
pub const ACCOUNTS_MODULE: &str = "accounts";

// Schema served by chains that were created without one
pub fn default_abi() -> Value {
    json!({
        "version": "mockchain::abi/1.0",
        "types": [],
        "structs": [
            {
                "name": "block_position",
                "base": "",
                "fields": [
                    { "name": "block_num", "type": "uint64" },
                    { "name": "block_id", "type": "checksum256" }
                ]
            },
            {
                "name": "action",
                "base": "",
                "fields": [
                    { "name": "account", "type": "name" },
                    { "name": "name", "type": "name" },
                    { "name": "authorization", "type": "name[]" },
                    { "name": "data", "type": "bytes" }
                ]
            }
        ],
        "actions": [],
        "tables": []
    })
}

/// Default config file looked up in the working directory when no
/// `--config` flag or `GT_CONFIG` env var is provided.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "gateway.toml";

/// Session attribute holding the server-side outbound command serial.
pub const ATTR_COMMAND_SERIAL: &str = "command_serial";

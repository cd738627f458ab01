use wrapp_ioc::types::TypeInfo;

/// Errors when registering or reading a config
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConfigError {
    /// A config of this type is already registered
    #[error("A config of type '{0}' is already registered")]
    AlreadyRegistered(TypeInfo),
    /// The stored config is not of the requested type
    #[error("The config stored for '{0}' has a different type")]
    Mismatch(TypeInfo),
}

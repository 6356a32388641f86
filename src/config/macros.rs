/// Configuration macros for single-declaration config sections
///
/// `config_struct!` declares a configuration section with its defaults inline:
/// field name, type and default value live on one line, and the macro emits
/// the struct, its `Default` impl and serde support.

/// Define a configuration section with embedded defaults
///
/// # Example
/// ```ignore
/// chatwire::config_struct! {
///     /// Outbound pacing for chat messages
///     pub struct PacingConfig {
///         message_rate_limit: usize = 20,
///         message_rate_window_ms: u64 = 30_000,
///     }
/// }
///
/// let cfg = PacingConfig::default();
/// assert_eq!(cfg.message_rate_limit, 20);
/// ```
///
/// Missing keys fall back to their defaults (`#[serde(default)]`); unknown
/// keys are rejected so a misspelled option fails loudly at load time.
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default, deny_unknown_fields)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}

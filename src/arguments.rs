/// Centralized command-line argument handling
///
/// Consolidates argument parsing and debug flag checking so the logger and
/// binaries read from one thread-safe store instead of calling env::args()
/// in a dozen places.
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

/// Trader loop debug mode
pub fn is_debug_trader_enabled() -> bool {
    has_arg("--debug-trader")
}

/// Decision parsing/prompt debug mode
pub fn is_debug_decision_enabled() -> bool {
    has_arg("--debug-decision")
}

/// Exchange API debug mode
pub fn is_debug_exchange_enabled() -> bool {
    has_arg("--debug-exchange")
}

/// AI provider debug mode
pub fn is_debug_ai_enabled() -> bool {
    has_arg("--debug-ai")
}

/// Market data debug mode
pub fn is_debug_market_enabled() -> bool {
    has_arg("--debug-market")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_arg_value() {
        set_cmd_args(vec![
            "futuresbot".to_string(),
            "--config".to_string(),
            "traders.json".to_string(),
        ]);
        assert_eq!(get_arg_value("--config"), Some("traders.json".to_string()));
        assert_eq!(get_arg_value("--missing"), None);
        assert!(has_arg("--config"));
    }
}

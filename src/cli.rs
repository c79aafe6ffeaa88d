//! Interactive startup prompts
//!
//! When the configuration carries no interfaces (or `--interactive` is
//! passed), the operator is prompted for a listen port and up to two
//! interfaces out of the discovered list. Input parsing is split from the
//! prompt loops so it stays testable.

use std::io::{self, Write};

use tracing::{info, warn};

use crate::config::{InterfaceConfig, MIN_LISTEN_PORT};
use crate::error::{MwanProxyError, SelectError};
use crate::iface::DiscoveredInterface;

/// Parse one line of port input
///
/// Blank input selects the default (`Ok(None)`); otherwise the port must be
/// a number in 1024-65535.
pub fn parse_port_input(input: &str) -> Result<Option<u16>, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let port: u16 = trimmed
        .parse()
        .map_err(|_| "Invalid port number".to_string())?;

    if port < MIN_LISTEN_PORT {
        return Err(format!("Port must be between {MIN_LISTEN_PORT} and 65535"));
    }

    Ok(Some(port))
}

/// Parse one line of interface selection input
///
/// Accepts one or two whitespace-separated 1-based indices; a single index
/// is duplicated. Returns 0-based indices.
pub fn parse_selection_input(input: &str, available: usize) -> Result<(usize, usize), String> {
    let tokens: Vec<&str> = input.split_whitespace().collect();

    if tokens.is_empty() {
        return Err("Please select at least one interface".to_string());
    }
    if tokens.len() > 2 {
        return Err("Please select maximum 2 interfaces".to_string());
    }

    let mut indices = Vec::with_capacity(2);
    for token in &tokens {
        let one_based: usize = token
            .parse()
            .map_err(|_| "Invalid input. Please enter numbers only".to_string())?;
        if one_based == 0 || one_based > available {
            return Err("Invalid selection. Please try again".to_string());
        }
        indices.push(one_based - 1);
    }

    if indices.len() == 1 {
        indices.push(indices[0]);
    }

    Ok((indices[0], indices[1]))
}

/// Prompt for the listen port, blank keeps `default`
///
/// Loops until the input parses; I/O errors fall back to the default.
#[must_use]
pub fn prompt_port(default: u16) -> u16 {
    loop {
        let Ok(input) = read_line(&format!("Enter port number (default {default}): ")) else {
            return default;
        };
        match parse_port_input(&input) {
            Ok(Some(port)) => return port,
            Ok(None) => return default,
            Err(msg) => println!("{msg}"),
        }
    }
}

/// Let the operator pick up to two interfaces out of the discovered list
///
/// A single discovered interface is selected twice automatically so the
/// round-robin still alternates.
///
/// # Errors
///
/// Returns `SelectError::NoInterfaces` when nothing was discovered.
pub fn select_interfaces(
    available: &[DiscoveredInterface],
) -> Result<Vec<InterfaceConfig>, MwanProxyError> {
    if available.is_empty() {
        return Err(SelectError::NoInterfaces.into());
    }

    println!("\nAvailable Network Interfaces:");
    println!("-----------------------------");
    for (i, iface) in available.iter().enumerate() {
        println!("{}. {}", i + 1, iface);
    }

    if available.len() == 1 {
        warn!("Only one interface available; the proxy will work but without load balancing");
        let only = &available[0];
        info!("Selected single interface: {} ({})", only.name, only.ip);
        let entry = InterfaceConfig::new(&only.name, only.ip);
        return Ok(vec![entry.clone(), entry]);
    }

    println!("\nSelect interface(s) to use (enter numbers separated by space):");
    println!("Note: You can select the same interface twice if needed");

    loop {
        let input = read_line("> ").map_err(MwanProxyError::Io)?;
        match parse_selection_input(&input, available.len()) {
            Ok((first, second)) => {
                let mut selected = Vec::with_capacity(2);
                for index in [first, second] {
                    let iface = &available[index];
                    info!("Selected interface: {} ({})", iface.name, iface.ip);
                    selected.push(InterfaceConfig::new(&iface.name, iface.ip));
                }
                return Ok(selected);
            }
            Err(msg) => println!("{msg}"),
        }
    }
}

/// Print a prompt and read one line from stdin
fn read_line(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_input_blank_is_default() {
        assert_eq!(parse_port_input(""), Ok(None));
        assert_eq!(parse_port_input("  \n"), Ok(None));
    }

    #[test]
    fn test_port_input_valid() {
        assert_eq!(parse_port_input("8080"), Ok(Some(8080)));
        assert_eq!(parse_port_input(" 65535 "), Ok(Some(65535)));
        assert_eq!(parse_port_input("1024"), Ok(Some(1024)));
    }

    #[test]
    fn test_port_input_rejects_privileged_and_garbage() {
        assert!(parse_port_input("80").is_err());
        assert!(parse_port_input("0").is_err());
        assert!(parse_port_input("not-a-port").is_err());
        assert!(parse_port_input("70000").is_err());
    }

    #[test]
    fn test_selection_single_duplicated() {
        assert_eq!(parse_selection_input("1", 3), Ok((0, 0)));
        assert_eq!(parse_selection_input(" 2 ", 3), Ok((1, 1)));
    }

    #[test]
    fn test_selection_pair() {
        assert_eq!(parse_selection_input("1 3", 3), Ok((0, 2)));
        assert_eq!(parse_selection_input("2 2", 3), Ok((1, 1)));
    }

    #[test]
    fn test_selection_rejects_bad_input() {
        assert!(parse_selection_input("", 3).is_err());
        assert!(parse_selection_input("1 2 3", 3).is_err());
        assert!(parse_selection_input("0", 3).is_err());
        assert!(parse_selection_input("4", 3).is_err());
        assert!(parse_selection_input("one", 3).is_err());
    }

    #[test]
    fn test_select_interfaces_empty_errors() {
        let result = select_interfaces(&[]);
        assert!(matches!(
            result,
            Err(MwanProxyError::Select(SelectError::NoInterfaces))
        ));
    }
}

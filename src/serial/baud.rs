//! Baud rate table
//!
//! Maps the integer baud rates a user may request to the termios speed
//! tokens of the platform. The table is enumerated explicitly and closed by a
//! zero sentinel; lookups scan it linearly.

use crate::error::ConfigError;

/// Platform line-speed token as understood by `cfsetispeed`/`cfsetospeed`
pub type Speed = libc::speed_t;

/// Supported baud rates, terminated by a `(0, 0)` sentinel
#[cfg(any(target_os = "linux", target_os = "android"))]
const BAUD_TABLE: &[(u32, Speed)] = &[
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
    (460800, libc::B460800),
    (500000, libc::B500000),
    (576000, libc::B576000),
    (921600, libc::B921600),
    (1000000, libc::B1000000),
    (1152000, libc::B1152000),
    (1500000, libc::B1500000),
    (2000000, libc::B2000000),
    (2500000, libc::B2500000),
    (3000000, libc::B3000000),
    (3500000, libc::B3500000),
    (4000000, libc::B4000000),
    (0, 0),
];

// BSD-style termios only defines the classic rates.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const BAUD_TABLE: &[(u32, Speed)] = &[
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
    (0, 0),
];

/// Baud rate used when the user gives none
pub const DEFAULT_BAUD: u32 = 57600;

/// Resolve a requested baud rate to its platform speed token
///
/// Unsupported rates are a configuration error: they indicate a typo in the
/// invocation, not a condition worth retrying.
pub fn resolve(baud: u32) -> Result<Speed, ConfigError> {
    for &(rate, speed) in BAUD_TABLE {
        if rate == 0 {
            break;
        }
        if rate == baud {
            return Ok(speed);
        }
    }
    Err(ConfigError::UnsupportedBaud(baud))
}

/// All supported baud rates in ascending order
pub fn supported() -> impl Iterator<Item = u32> {
    BAUD_TABLE
        .iter()
        .map(|&(rate, _)| rate)
        .take_while(|&rate| rate != 0)
}

/// Supported rates as a comma-separated list, for messages
pub fn supported_list() -> String {
    supported()
        .map(|rate| rate.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entry_resolves_to_its_token() {
        for &(rate, speed) in BAUD_TABLE.iter().take_while(|(rate, _)| *rate != 0) {
            assert_eq!(resolve(rate).unwrap(), speed, "baud {}", rate);
        }
    }

    #[test]
    fn test_common_rates() {
        assert_eq!(resolve(9600).unwrap(), libc::B9600);
        assert_eq!(resolve(115200).unwrap(), libc::B115200);
        assert_eq!(resolve(DEFAULT_BAUD).unwrap(), libc::B57600);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_range() {
        assert_eq!(supported().next(), Some(50));
        assert_eq!(supported().last(), Some(4_000_000));
        assert_eq!(supported().count(), 30);
        assert_eq!(resolve(4_000_000).unwrap(), libc::B4000000);
    }

    #[test]
    fn test_supported_list() {
        let rates = supported_list();
        assert!(rates.starts_with("50, 75, 110, "));
        assert!(rates.contains(", 57600, 115200, "));
    }

    #[test]
    fn test_table_is_ascending() {
        let rates: Vec<u32> = supported().collect();
        assert!(rates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unsupported_rates() {
        for baud in [0, 1, 9601, 14400, 4_000_001, u32::MAX] {
            match resolve(baud) {
                Err(ConfigError::UnsupportedBaud(b)) => assert_eq!(b, baud),
                other => panic!("baud {} resolved to {:?}", baud, other),
            }
        }
    }
}

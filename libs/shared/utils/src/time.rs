use chrono_tz::Tz;
use tracing::warn;

use shared_config::DEFAULT_CLINIC_TIMEZONE;

/// IANA zone for the clinic; unknown names fall back to the default zone.
pub fn clinic_timezone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or_else(|_| {
        warn!("Unknown clinic timezone '{}', using {}", name, DEFAULT_CLINIC_TIMEZONE);
        default_clinic_timezone()
    })
}

pub fn default_clinic_timezone() -> Tz {
    DEFAULT_CLINIC_TIMEZONE.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_zone_and_falls_back_otherwise() {
        assert_eq!(clinic_timezone("America/Bogota"), chrono_tz::America::Bogota);
        assert_eq!(clinic_timezone("Mars/Olympus"), chrono_tz::Europe::Madrid);
    }

    #[test]
    fn fallback_follows_configured_default_name() {
        assert_eq!(default_clinic_timezone().name(), DEFAULT_CLINIC_TIMEZONE);
        assert_eq!(clinic_timezone(""), default_clinic_timezone());
    }
}

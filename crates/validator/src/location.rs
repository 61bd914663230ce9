//! Location checks: bp.json location blocks and the numeric regproducer
//! location field.
//!
//! bp.json locations carry an ISO-3166-1 alpha-2 country plus coordinates.
//! The on-chain registration carries a single number whose meaning is
//! chain-specific: a numeric country code, or a UTC offset slot (possibly
//! scaled by 100).

use serde_json::Value;

use bpscan_common::config::LocationCheck;
use bpscan_common::countries;
use bpscan_common::findings::{Class, Finding, Kind};

use crate::Run;

/// Map a 0–23 offset slot onto a UTC label. Slots 12–23 wrap into the
/// negative range: 12 → UTC-12, 23 → UTC-1.
pub(crate) fn timezone_label(slot: u32) -> String {
    if slot >= 12 {
        format!("UTC-{}", 24 - slot)
    } else {
        format!("UTC+{slot}")
    }
}

impl Run<'_> {
    /// Validate a bp.json location block. Emits one aggregate `ok` when the
    /// country, name and coordinates all hold up.
    pub(crate) fn check_location_block(&mut self, location: &Value, class: Class, is_org: bool) {
        let mut all_valid = true;

        // ── Country ───────────────────────────────────────────────────
        let country = location.get("country").and_then(Value::as_str).unwrap_or("");
        let mut country_code = country.to_string();
        if country.is_empty() {
            self.log
                .add(Finding::new(Kind::Err, class, "location has no country"));
            all_valid = false;
        } else {
            if country.chars().any(|c| c.is_ascii_lowercase()) {
                country_code = country.to_ascii_uppercase();
                self.log.add(
                    Finding::new(Kind::Warn, class, "country code should be uppercase")
                        .with("country", country)
                        .with("suggested", country_code.clone()),
                );
            }
            match countries::by_alpha2(&country_code) {
                Some(entry) => {
                    if is_org {
                        if !self.report.info.contains_key("country_name") {
                            self.report.set_info("country_name", entry.name);
                        }
                        if !self.report.info.contains_key("country_alpha2") {
                            self.report.set_info("country_alpha2", entry.alpha2);
                        }
                    }
                }
                None => {
                    self.log.add(
                        Finding::new(Kind::Err, class, "invalid country code")
                            .with("country", country),
                    );
                    all_valid = false;
                }
            }
        }

        // ── Name ──────────────────────────────────────────────────────
        let name = location.get("name").and_then(Value::as_str).unwrap_or("");
        let producer_name = self
            .report
            .info
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("");
        if name.is_empty() {
            self.log
                .add(Finding::new(Kind::Err, class, "location has no name"));
            all_valid = false;
        } else if name == producer_name {
            self.log.add(
                Finding::new(Kind::Err, class, "location name is the producer name")
                    .with("name", name),
            );
            all_valid = false;
        }

        // ── Coordinates ───────────────────────────────────────────────
        let latitude = location.get("latitude").and_then(Value::as_f64);
        let longitude = location.get("longitude").and_then(Value::as_f64);
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    self.log.add(
                        Finding::new(Kind::Err, class, "location coordinates out of range")
                            .with("latitude", lat)
                            .with("longitude", lon),
                    );
                    all_valid = false;
                } else if lat == 0.0 && lon == 0.0 {
                    self.log.add(Finding::new(
                        Kind::Err,
                        class,
                        "location coordinates are exactly (0, 0)",
                    ));
                    all_valid = false;
                }
            }
            _ => {
                self.log.add(Finding::new(
                    Kind::Err,
                    class,
                    "location is missing latitude or longitude",
                ));
                all_valid = false;
            }
        }

        if all_valid {
            self.log.add(
                Finding::new(Kind::Ok, class, "valid location")
                    .with("country", country_code)
                    .with("name", name),
            );
        }
    }

    /// Validate the numeric location on the registration row and derive the
    /// `info` scalars for it.
    pub(crate) fn check_regproducer_location(&mut self) {
        let value = self.regproducer.location;
        match self.chain.location_check {
            LocationCheck::Country => match u16::try_from(value)
                .ok()
                .and_then(countries::by_numeric)
            {
                Some(entry) => {
                    self.report.set_info("country_name", entry.name);
                    self.report.set_info("country_alpha2", entry.alpha2);
                    self.log.add(
                        Finding::new(Kind::Ok, Class::Regproducer, "valid registered location")
                            .with("country", entry.name),
                    );
                }
                None => {
                    self.log.add(
                        Finding::new(
                            Kind::Crit,
                            Class::Regproducer,
                            "registered location is not a country code",
                        )
                        .with("location", value),
                    );
                }
            },
            LocationCheck::Timezone => self.check_timezone_slot(value, value),
            LocationCheck::Timezone100 => {
                if value <= 2399 {
                    self.check_timezone_slot(value / 100, value);
                } else {
                    self.log.add(
                        Finding::new(
                            Kind::Crit,
                            Class::Regproducer,
                            "registered location is not a timezone",
                        )
                        .with("location", value),
                    );
                }
            }
        }
    }

    fn check_timezone_slot(&mut self, slot: u32, raw: u32) {
        if slot <= 23 {
            let label = timezone_label(slot);
            self.report.set_info("timezone", label.clone());
            self.log.add(
                Finding::new(Kind::Ok, Class::Regproducer, "valid registered location")
                    .with("timezone", label),
            );
        } else {
            self.log.add(
                Finding::new(
                    Kind::Crit,
                    Class::Regproducer,
                    "registered location is not a timezone",
                )
                .with("location", raw),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_wraps_at_twelve() {
        assert_eq!(timezone_label(0), "UTC+0");
        assert_eq!(timezone_label(11), "UTC+11");
        assert_eq!(timezone_label(12), "UTC-12");
        assert_eq!(timezone_label(23), "UTC-1");
    }
}

//! The registry of built-in cable drivers.

use super::{remote_bitbang, sim, CableDriver, CableError};

/// Creates driver instances of one cable family.
pub trait CableFactory: std::fmt::Debug + Sync {
    /// The name used to select the driver, e.g. `remote_bitbang`.
    fn name(&self) -> &'static str;

    /// A one-line description of the cable family.
    fn description(&self) -> &'static str;

    /// Open a cable. The meaning of `params` is driver specific.
    fn open(&self, params: &[&str]) -> Result<Box<dyn CableDriver>, CableError>;
}

/// Name and description of a registered driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableInfo {
    pub name: &'static str,
    pub description: &'static str,
}

const DRIVERS: &[&dyn CableFactory] = &[
    &remote_bitbang::RemoteBitbangFactory,
    &sim::SimulatedCableFactory,
];

/// Look up a driver by name, ignoring case.
pub fn find_driver(name: &str) -> Result<&'static dyn CableFactory, CableError> {
    DRIVERS
        .iter()
        .copied()
        .find(|driver| driver.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| CableError::DriverNotFound(name.to_string()))
}

/// All registered drivers.
#[tracing::instrument(skip_all)]
pub fn list_drivers() -> Vec<CableInfo> {
    DRIVERS
        .iter()
        .map(|driver| CableInfo {
            name: driver.name(),
            description: driver.description(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drivers_are_found_by_name() {
        assert_eq!(find_driver("sim").unwrap().name(), "sim");
        assert_eq!(
            find_driver("Remote_Bitbang").unwrap().name(),
            "remote_bitbang"
        );
        assert!(matches!(
            find_driver("parport"),
            Err(CableError::DriverNotFound(name)) if name == "parport"
        ));
    }

    #[test]
    fn listing_contains_every_driver() {
        let names: Vec<_> = list_drivers().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["remote_bitbang", "sim"]);
    }
}

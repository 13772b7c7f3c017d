use proptest::prelude::*;
use smithay::reexports::drm::control::connector;

use super::*;
use crate::error::KmsError;
use crate::kms::resolver::resolve;
use crate::kms::{PipeId, ANY_PIPE};

#[test]
fn picks_lowest_allowed_pipe() {
    let mut device = FakeDevice::new(3, 1);
    device.set_encoder_masks(CONNECTOR_BASE, &[0b110]);

    let config = resolve(&device, CONNECTOR_BASE, ANY_PIPE).unwrap();
    assert_eq!(config.pipe, PipeId::B);
    assert_eq!(config.crtc.id, CRTC_BASE + 1);
    assert_eq!(config.connector.name(), "HDMI-A-1");

    let config = resolve(&device, CONNECTOR_BASE, PipeId::C.mask()).unwrap();
    assert_eq!(config.pipe, PipeId::C);

    assert!(matches!(
        resolve(&device, CONNECTOR_BASE, PipeId::A.mask()),
        Err(KmsError::NoSuitablePipe { connector: CONNECTOR_BASE, allowed: 1 })
    ));
}

#[test]
fn walks_pipes_before_encoders() {
    let mut device = FakeDevice::new(3, 1);
    device.set_encoder_masks(CONNECTOR_BASE, &[0b100, 0b010]);

    let config = resolve(&device, CONNECTOR_BASE, ANY_PIPE).unwrap();
    assert_eq!(config.pipe, PipeId::B);
    assert_eq!(config.encoder.possible_crtcs, 0b010);
}

#[test]
fn encoder_bits_beyond_crtc_count_are_ignored() {
    let mut device = FakeDevice::new(2, 1);
    device.set_encoder_masks(CONNECTOR_BASE, &[0b100]);

    assert!(matches!(
        resolve(&device, CONNECTOR_BASE, ANY_PIPE),
        Err(KmsError::NoSuitablePipe { .. })
    ));
}

#[test]
fn default_mode_is_the_preferred_one() {
    let mut device = FakeDevice::new(1, 1);
    device.connector_mut(CONNECTOR_BASE).modes =
        vec![mode(1024, 768, false), mode(2560, 1440, true)];

    let config = resolve(&device, CONNECTOR_BASE, ANY_PIPE).unwrap();
    assert_eq!(config.default_mode.size(), (2560, 1440));
}

#[test]
fn connector_errors() {
    let mut device = FakeDevice::new(1, 2);

    assert!(matches!(
        resolve(&device, 999, ANY_PIPE),
        Err(KmsError::ConnectorNotFound(999))
    ));

    device.connector_mut(CONNECTOR_BASE).state = connector::State::Disconnected;
    assert!(matches!(
        resolve(&device, CONNECTOR_BASE, ANY_PIPE),
        Err(KmsError::ConnectorDisconnected(CONNECTOR_BASE))
    ));

    let second = CONNECTOR_BASE + 1;
    device.connector_mut(second).modes.clear();
    let err = resolve(&device, second, ANY_PIPE).unwrap_err();
    assert!(matches!(err, KmsError::NoModeAvailable(id) if id == second));
    assert!(err.is_resolution_error());
}

#[test]
fn pipe_is_checked_before_modes() {
    let mut device = FakeDevice::new(1, 1);
    device.connector_mut(CONNECTOR_BASE).modes.clear();

    assert!(matches!(
        resolve(&device, CONNECTOR_BASE, 0),
        Err(KmsError::NoSuitablePipe { .. })
    ));
}

#[test]
fn resolving_issues_no_calls() {
    let device = FakeDevice::new(2, 1);
    resolve(&device, CONNECTOR_BASE, ANY_PIPE).unwrap();
    assert!(device.calls.is_empty());
}

proptest! {
    #[test]
    fn resolved_pipe_is_in_both_masks(
        n_crtcs in 1usize..=6,
        masks in prop::collection::vec(0u32..64, 0..3),
        allowed in 0u32..64,
    ) {
        let mut device = FakeDevice::new(n_crtcs, 1);
        device.set_encoder_masks(CONNECTOR_BASE, &masks);

        let possible = masks.iter().fold(0, |acc, mask| acc | mask);
        let usable = possible & allowed & ((1 << n_crtcs) - 1);

        match resolve(&device, CONNECTOR_BASE, allowed) {
            Ok(config) => {
                let bit = config.pipe.mask();
                prop_assert_ne!(bit & allowed, 0);
                prop_assert_ne!(bit & config.encoder.possible_crtcs, 0);
                prop_assert_eq!(config.pipe.index(), usable.trailing_zeros() as usize);
            }
            Err(err) => {
                prop_assert_eq!(usable, 0);
                prop_assert!(matches!(err, KmsError::NoSuitablePipe { .. }), "{}", err);
            }
        }
    }
}

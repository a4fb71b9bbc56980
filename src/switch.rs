//! Channel-indexed view over a device's switch parameters.
//!
//! Channels are numbered from 1 everywhere in the public API. The wire
//! `outlet` field is 0-based; this module is the only place that converts
//! between the two. Channel `c` is always the entry whose `outlet` is
//! `c - 1`, whatever its position in the `switches` array.

use crate::error::{EwelinkError, Result};
use crate::types::{Device, Outlet, PowerAction, SwitchParams, SwitchState};

/// Number of switch channels of a device (0 when it has no switch)
pub fn channel_count(device: &Device) -> usize {
    device.params.as_ref().map_or(0, params_channel_count)
}

fn params_channel_count(params: &SwitchParams) -> usize {
    match params {
        SwitchParams::Single { .. } => 1,
        SwitchParams::Multi { channels } => channels.len(),
    }
}

/// State of a 1-based channel
pub fn state_of(device: &Device, channel: usize) -> Result<SwitchState> {
    let params = device.params.as_ref().ok_or(EwelinkError::OutOfRange {
        channel,
        count: 0,
    })?;
    params_state_of(params, channel)
}

/// State of a 1-based channel of raw switch parameters
pub fn params_state_of(params: &SwitchParams, channel: usize) -> Result<SwitchState> {
    match params {
        SwitchParams::Single { switch } => {
            single_channel(channel)?;
            Ok(*switch)
        }
        SwitchParams::Multi { channels } => Ok(channels[position_of(channels, channel)?].switch),
    }
}

/// States of every channel, in channel order
pub fn all_states(params: &SwitchParams) -> Vec<(usize, SwitchState)> {
    match params {
        SwitchParams::Single { switch } => vec![(1, *switch)],
        SwitchParams::Multi { channels } => {
            let mut states: Vec<_> = channels
                .iter()
                .map(|c| (c.outlet as usize + 1, c.switch))
                .collect();
            states.sort_by_key(|(channel, _)| *channel);
            states
        }
    }
}

/// Copy of `params` with only `channel` set to `state`
pub fn with_state(params: &SwitchParams, channel: usize, state: SwitchState) -> Result<SwitchParams> {
    let mut updated = params.clone();
    match &mut updated {
        SwitchParams::Single { switch } => {
            single_channel(channel)?;
            *switch = state;
        }
        SwitchParams::Multi { channels } => {
            let index = position_of(channels, channel)?;
            channels[index].switch = state;
        }
    }
    Ok(updated)
}

/// Opposite power state
pub fn toggle(state: SwitchState) -> SwitchState {
    match state {
        SwitchState::On => SwitchState::Off,
        SwitchState::Off => SwitchState::On,
    }
}

/// Target state for `action` given the channel's current state
pub fn resolve_action(current: SwitchState, action: PowerAction) -> SwitchState {
    match action {
        PowerAction::On => SwitchState::On,
        PowerAction::Off => SwitchState::Off,
        PowerAction::Toggle => toggle(current),
    }
}

/// Merge a wire update into stored parameters
///
/// Multi-channel updates may carry only some outlets; each is matched by its
/// `outlet` index. Returns `None` when the update has the other variant, so
/// a device never changes shape.
pub fn apply(current: &SwitchParams, update: &SwitchParams) -> Option<SwitchParams> {
    match (current, update) {
        (SwitchParams::Single { .. }, SwitchParams::Single { switch }) => {
            Some(SwitchParams::Single { switch: *switch })
        }
        (SwitchParams::Multi { channels }, SwitchParams::Multi { channels: changes }) => {
            let mut merged = channels.clone();
            for change in changes {
                if let Some(slot) = merged.iter_mut().find(|c| c.outlet == change.outlet) {
                    slot.switch = change.switch;
                }
            }
            Some(SwitchParams::Multi { channels: merged })
        }
        _ => None,
    }
}

/// Parameters addressing a single outlet, as sent by REST clients
pub fn single_outlet(channel: usize, state: SwitchState) -> Result<SwitchParams> {
    let outlet = channel
        .checked_sub(1)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or(EwelinkError::OutOfRange { channel, count: 0 })?;
    Ok(SwitchParams::Multi {
        channels: vec![Outlet {
            outlet,
            switch: state,
        }],
    })
}

fn single_channel(channel: usize) -> Result<()> {
    if channel == 1 {
        Ok(())
    } else {
        Err(EwelinkError::OutOfRange { channel, count: 1 })
    }
}

/// Array position of the entry whose `outlet` is `channel - 1`
fn position_of(channels: &[Outlet], channel: usize) -> Result<usize> {
    channel
        .checked_sub(1)
        .and_then(|outlet| channels.iter().position(|c| c.outlet as usize == outlet))
        .ok_or(EwelinkError::OutOfRange {
            channel,
            count: channels.len(),
        })
}

//! Correction engine.
//!
//! Applies documentation, error model, timing offset and calibration actions to a data block in
//! place. Composite, server-side, subset and map actions are handled by the resolver.

use crate::actions::{
    Action, ActionKind, Actions, Calibration, Documentation, ErrorModelAction, OffsetMethod,
    TimeOffset,
};
use crate::error::CorrectionError;
use crate::metrics::record_correction;
use crate::models::{ClientBlock, Environment};
use crate::operation::Operation;
use crate::operations::{AddOffset, Calibrate, Invert};
use crate::types::{Buffer, Compression, DataBlock, Dim, DimCoords, ErrorData, ErrorModel};

use tracing::{event, Level};

/// Correction engine options
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CorrectionOptions {
    /// Fail on the first action that cannot be applied instead of skipping it
    pub strict: bool,
}

impl From<&Environment> for CorrectionOptions {
    fn from(environment: &Environment) -> Self {
        Self {
            strict: environment.strict_corrections,
        }
    }
}

/// Result of applying one action
#[derive(Debug, PartialEq)]
enum Outcome {
    Applied,
    /// The action's preconditions are not met, so it has no effect
    NoEffect(&'static str),
    /// Part or all of the action could not be applied
    Skipped(Vec<String>),
}

impl Outcome {
    fn from_skipped(skipped: Vec<String>) -> Self {
        if skipped.is_empty() {
            Self::Applied
        } else {
            Self::Skipped(skipped)
        }
    }
}

/// Apply the in-range actions to `block`.
///
/// Signal description actions are applied before signal actions, each in list order.
/// Nothing is applied when the client asks for data as stored.
pub fn apply_actions(
    block: &mut DataBlock,
    client: &ClientBlock,
    actions: &Actions,
    options: &CorrectionOptions,
) -> Result<(), CorrectionError> {
    if client.get_asis {
        event!(Level::DEBUG, "corrections not applied: data requested as stored");
        return Ok(());
    }
    for action in actions.in_range() {
        let outcome = apply_action(block, client, action)?;
        record(action, outcome, options)?;
    }
    Ok(())
}

fn apply_action(
    block: &mut DataBlock,
    client: &ClientBlock,
    action: &Action,
) -> Result<Outcome, CorrectionError> {
    match &action.kind {
        ActionKind::Documentation(documentation) => Ok(apply_documentation(block, documentation)),
        ActionKind::ErrorModel(error_model) => Ok(apply_error_model(block, error_model)),
        ActionKind::TimeOffset(time_offset) => {
            if client.get_notoff {
                return Ok(Outcome::NoEffect("timing offsets not requested"));
            }
            apply_time_offset(block, time_offset)
        }
        ActionKind::Calibration(calibration) => apply_calibration(block, client, calibration),
        ActionKind::Composite(_)
        | ActionKind::ServerSide(_)
        | ActionKind::Subset(_)
        | ActionKind::Map(_) => Ok(Outcome::NoEffect("not a correction")),
    }
}

/// Log and count the outcome of an action. In strict mode a skipped action is an error.
fn record(
    action: &Action,
    outcome: Outcome,
    options: &CorrectionOptions,
) -> Result<(), CorrectionError> {
    let action_type = action.action_type();
    match outcome {
        Outcome::Applied => {
            event!(Level::DEBUG, action = %action_type, id = action.id, "applied");
            record_correction(&action_type.to_string(), "applied");
        }
        Outcome::NoEffect(reason) => {
            event!(Level::DEBUG, action = %action_type, id = action.id, reason, "no effect");
            record_correction(&action_type.to_string(), "no_effect");
        }
        Outcome::Skipped(reasons) => {
            let reason = reasons.join("; ");
            event!(Level::WARN, action = %action_type, id = action.id, %reason, "skipped");
            record_correction(&action_type.to_string(), "skipped");
            if options.strict {
                return Err(CorrectionError::Skipped {
                    action: action_type,
                    id: action.id,
                    reason,
                });
            }
        }
    }
    Ok(())
}

/// Returns the dimension `dimid` of the block, or a reason for skipping it.
fn dim_mut(dims: &mut [Dim], dimid: usize) -> Result<&mut Dim, String> {
    let rank = dims.len();
    dims.get_mut(dimid)
        .ok_or_else(|| format!("dimension {dimid} outside rank {rank}"))
}

fn overwrite(field: &mut String, value: &str) {
    if !value.is_empty() {
        *field = value.to_string();
    }
}

fn apply_documentation(block: &mut DataBlock, documentation: &Documentation) -> Outcome {
    overwrite(&mut block.label, &documentation.label);
    overwrite(&mut block.units, &documentation.units);
    overwrite(&mut block.description, &documentation.description);
    let mut skipped = vec![];
    for dim_documentation in &documentation.dimensions {
        match dim_mut(&mut block.dims, dim_documentation.dimid) {
            Ok(dim) => {
                overwrite(&mut dim.label, &dim_documentation.label);
                overwrite(&mut dim.units, &dim_documentation.units);
            }
            Err(reason) => skipped.push(reason),
        }
    }
    Outcome::from_skipped(skipped)
}

fn apply_error_model(block: &mut DataBlock, error_model: &ErrorModelAction) -> Outcome {
    block.error_model = ErrorModel {
        model: error_model.model,
        params: error_model.params.clone(),
    };
    let mut skipped = vec![];
    for dim_model in &error_model.dimensions {
        match dim_mut(&mut block.dims, dim_model.dimid) {
            Ok(dim) => {
                dim.error_model = ErrorModel {
                    model: dim_model.model,
                    params: dim_model.params.clone(),
                }
            }
            Err(reason) => skipped.push(reason),
        }
    }
    Outcome::from_skipped(skipped)
}

fn apply_time_offset(
    block: &mut DataBlock,
    time_offset: &TimeOffset,
) -> Result<Outcome, CorrectionError> {
    let Some(order) = block.order else {
        return Ok(Outcome::NoEffect("no order dimension"));
    };
    let dim = match dim_mut(&mut block.dims, order) {
        Ok(dim) => dim,
        Err(reason) => return Ok(Outcome::Skipped(vec![reason])),
    };
    match time_offset.method {
        OffsetMethod::Shift => {
            let offset = time_offset.offset;
            if offset == 0.0 {
                return Ok(Outcome::NoEffect("zero offset"));
            }
            match &mut dim.coords {
                DimCoords::Compressed(Compression::Regular { start, .. })
                | DimCoords::Compressed(Compression::Uniform { start, .. }) => *start += offset,
                DimCoords::Compressed(Compression::Domains { starts, .. })
                | DimCoords::Compressed(Compression::Starts { starts }) => {
                    starts.iter_mut().for_each(|start| *start += offset)
                }
                DimCoords::Raw(buffer) => {
                    if let Some(values) = buffer.values_mut() {
                        AddOffset { offset }.execute(values)?;
                    }
                }
            }
        }
        OffsetMethod::Replace => {
            if time_offset.interval == 0.0 {
                return Ok(Outcome::NoEffect("zero interval"));
            }
            dim.coords = DimCoords::Compressed(Compression::Regular {
                start: time_offset.offset,
                step: time_offset.interval,
            });
        }
        OffsetMethod::Regularise => {
            if time_offset.interval == 0.0 {
                return Ok(Outcome::NoEffect("zero interval"));
            }
            if !dim.dtype.is_float() {
                return Ok(Outcome::NoEffect("integer dimension"));
            }
            let start = match &dim.coords {
                DimCoords::Compressed(Compression::Domains { lengths, starts, .. })
                    if lengths.len() == 1 && !starts.is_empty() =>
                {
                    starts[0]
                }
                _ => return Ok(Outcome::NoEffect("not a single domain")),
            };
            dim.coords = DimCoords::Compressed(Compression::Regular {
                start,
                step: time_offset.interval,
            });
        }
    }
    Ok(Outcome::Applied)
}

/// Calibrate a buffer in place, returning a reason if inversion is not possible.
fn calibrate_buffer(
    buffer: &mut Buffer,
    calibrate: Calibrate,
    invert: bool,
    what: &str,
    skipped: &mut Vec<String>,
) -> Result<(), CorrectionError> {
    let Some(values) = buffer.values_mut() else {
        return Ok(());
    };
    calibrate.execute(values)?;
    if invert {
        match Invert.execute(values) {
            Ok(()) => {}
            Err(error @ CorrectionError::UnsupportedDType { .. }) => {
                skipped.push(format!("{what}: {error}"))
            }
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn calibrate_errors(
    errors: &mut ErrorData,
    calibration: &Calibration,
    calibrate: Calibrate,
    what: &str,
    skipped: &mut Vec<String>,
) -> Result<(), CorrectionError> {
    let Some(target) = calibration.target else {
        return Ok(());
    };
    if target.includes_error() {
        let what = format!("{what} error");
        calibrate_buffer(&mut errors.hi, calibrate, calibration.invert, &what, skipped)?;
    }
    if target.includes_aserror() {
        let what = format!("{what} lower error");
        calibrate_buffer(&mut errors.lo, calibrate, calibration.invert, &what, skipped)?;
    }
    Ok(())
}

fn apply_calibration(
    block: &mut DataBlock,
    client: &ClientBlock,
    calibration: &Calibration,
) -> Result<Outcome, CorrectionError> {
    let mut skipped = vec![];
    let calibrate = Calibrate {
        factor: calibration.factor,
        offset: calibration.offset,
    };
    let targets_data = calibration
        .target
        .map(|target| target.includes_data())
        .unwrap_or(false);
    if !client.get_uncal {
        if targets_data {
            overwrite(&mut block.units, &calibration.units);
        }
        if !calibrate.is_identity() || calibration.invert {
            if targets_data {
                calibrate_buffer(
                    &mut block.data,
                    calibrate,
                    calibration.invert,
                    "data",
                    &mut skipped,
                )?;
            }
            calibrate_errors(&mut block.errors, calibration, calibrate, "data", &mut skipped)?;
        }
    }

    for dim_calibration in &calibration.dimensions {
        let dim = match dim_mut(&mut block.dims, dim_calibration.dimid) {
            Ok(dim) => dim,
            Err(reason) => {
                skipped.push(reason);
                continue;
            }
        };
        overwrite(&mut dim.units, &dim_calibration.units);
        let dim_calibrate = Calibrate {
            factor: dim_calibration.factor,
            offset: dim_calibration.offset,
        };
        if dim_calibrate.is_identity() && !dim_calibration.invert {
            continue;
        }
        let what = format!("dimension {}", dim_calibration.dimid);
        // Coordinates follow the data target, dimension errors their own targets.
        calibrate_errors(&mut dim.errors, calibration, dim_calibrate, &what, &mut skipped)?;
        if !targets_data {
            continue;
        }
        if dim_calibration.invert {
            dim.decompress();
        }
        match &mut dim.coords {
            DimCoords::Compressed(Compression::Regular { start, step }) => {
                *step *= dim_calibrate.factor;
                *start += dim_calibrate.offset;
            }
            DimCoords::Compressed(Compression::Domains {
                starts, intervals, ..
            }) => {
                intervals
                    .iter_mut()
                    .for_each(|interval| *interval *= dim_calibrate.factor);
                starts
                    .iter_mut()
                    .for_each(|start| *start += dim_calibrate.offset);
            }
            DimCoords::Compressed(Compression::Starts { starts }) => {
                starts.iter_mut().for_each(|start| {
                    *start = *start * dim_calibrate.factor + dim_calibrate.offset
                });
            }
            DimCoords::Compressed(Compression::Uniform {
                start, interval, ..
            }) => {
                *interval *= dim_calibrate.factor;
                *start += dim_calibrate.offset;
            }
            DimCoords::Raw(buffer) => {
                calibrate_buffer(
                    buffer,
                    dim_calibrate,
                    dim_calibration.invert,
                    &what,
                    &mut skipped,
                )?;
            }
        }
    }
    Ok(Outcome::from_skipped(skipped))
}

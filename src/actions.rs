//! Correction actions.
//!
//! Actions are parsed from the XML documents attached to a signal's metadata. There are two
//! documents: one on the signal description, valid for a range of experiments and passes, and
//! one on the signal instance itself. Instance actions always take priority.

use crate::error::XmlError;
use crate::subset::Subset;
use crate::xml;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Type of an action, without its payload.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Documentation,
    Calibration,
    ErrorModel,
    TimeOffset,
    Composite,
    ServerSide,
    Subset,
    Map,
}

/// Label and units for one dimension.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DimDocumentation {
    pub dimid: usize,
    pub label: String,
    pub units: String,
}

/// Replacement documentation strings. Empty strings leave the existing text unchanged.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Documentation {
    pub label: String,
    pub units: String,
    pub description: String,
    pub dimensions: Vec<DimDocumentation>,
}

/// Which part of a data block a calibration applies to.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CalibrationTarget {
    Data,
    Error,
    AsError,
    All,
}

impl CalibrationTarget {
    /// Parse a target name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "data" => Some(Self::Data),
            "error" => Some(Self::Error),
            "aserror" => Some(Self::AsError),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn includes_data(self) -> bool {
        matches!(self, Self::Data | Self::All)
    }

    /// Whether the symmetric (or upper) error is calibrated.
    pub fn includes_error(self) -> bool {
        matches!(self, Self::Error | Self::All)
    }

    /// Whether the lower asymmetric error is calibrated.
    pub fn includes_aserror(self) -> bool {
        matches!(self, Self::AsError | Self::All)
    }
}

/// Calibration of one dimension's coordinates.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DimCalibration {
    pub dimid: usize,
    pub factor: f64,
    pub offset: f64,
    pub invert: bool,
    pub units: String,
}

/// Linear calibration `y = factor * x + offset`, optionally followed by `y = 1 / y`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Calibration {
    /// Part of the block to calibrate. Without a target only dimension units are changed.
    pub target: Option<CalibrationTarget>,
    pub factor: f64,
    pub offset: f64,
    pub invert: bool,
    pub units: String,
    pub dimensions: Vec<DimCalibration>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            target: None,
            factor: 1.0,
            offset: 0.0,
            invert: false,
            units: String::new(),
            dimensions: vec![],
        }
    }
}

/// How a timing offset changes the order dimension.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMethod {
    /// Method 0: add the offset to the existing coordinates
    #[default]
    Shift,
    /// Method 1: replace the coordinates with a regular grid from the offset
    Replace,
    /// Method 2: convert a single-domain compression to a regular grid with a new interval
    Regularise,
}

impl OffsetMethod {
    /// Returns the method for a legacy method number.
    pub fn from_number(method: i64) -> Option<Self> {
        match method {
            0 => Some(Self::Shift),
            1 => Some(Self::Replace),
            2 => Some(Self::Regularise),
            _ => None,
        }
    }
}

/// Timing offset applied to the order (time) dimension.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimeOffset {
    pub method: OffsetMethod,
    pub offset: f64,
    pub interval: f64,
}

/// Error model of one dimension.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DimErrorModel {
    pub dimid: usize,
    pub model: i32,
    pub params: Vec<f32>,
}

/// Error model assignment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ErrorModelAction {
    pub model: i32,
    pub params: Vec<f32>,
    pub dimensions: Vec<DimErrorModel>,
}

/// Substitution of a dimension from another signal.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DimComposite {
    /// Dimension of the composite to replace
    pub to_dim: Option<usize>,
    /// Dimension of the source signal to take, or the source signal's data when absent
    pub from_dim: Option<usize>,
    pub file: String,
    pub format: String,
    pub dim_signal: String,
    pub dim_error: String,
    pub dim_aserror: String,
}

/// Subset applied to a data block after corrections.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SubsetAction {
    pub subset: Subset,
    /// Signal to subset
    pub data_signal: String,
    /// Structure member to extract before subsetting
    pub member: String,
    /// Function applied to the subset data
    pub function: String,
    /// Drop dimensions of length one
    pub reform: bool,
    /// Order dimension of the result
    pub order: Option<usize>,
}

/// A single mapping operation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct MapDim {
    pub dimid: usize,
    pub mapping: String,
    pub value: f64,
}

/// Mapping of dimension values, evaluated by the caller.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct MapAction {
    pub data_signal: String,
    pub mappings: Vec<MapDim>,
}

/// Definition of a derived signal assembled from other signals.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Composite {
    pub file: String,
    pub format: String,
    pub data_signal: String,
    pub error_signal: String,
    pub aserror_signal: String,
    /// Straight replacement of the signal
    pub map_to_signal: String,
    pub order: Option<usize>,
    pub dimensions: Vec<DimComposite>,
    pub subsets: Vec<SubsetAction>,
    pub maps: Vec<MapAction>,
}

/// Server-side subsetting requested by the client.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ServerSide {
    pub subsets: Vec<SubsetAction>,
    pub maps: Vec<MapAction>,
}

/// Action payloads.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Documentation(Documentation),
    Calibration(Calibration),
    ErrorModel(ErrorModelAction),
    TimeOffset(TimeOffset),
    Composite(Composite),
    ServerSide(ServerSide),
    Subset(SubsetAction),
    Map(MapAction),
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Documentation(_) => ActionType::Documentation,
            Self::Calibration(_) => ActionType::Calibration,
            Self::ErrorModel(_) => ActionType::ErrorModel,
            Self::TimeOffset(_) => ActionType::TimeOffset,
            Self::Composite(_) => ActionType::Composite,
            Self::ServerSide(_) => ActionType::ServerSide,
            Self::Subset(_) => ActionType::Subset,
            Self::Map(_) => ActionType::Map,
        }
    }
}

/// A correction action with its range of validity.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Action {
    pub id: i32,
    /// Inclusive experiment number range, 0 meaning unbounded
    pub exp_range: [i32; 2],
    /// Inclusive pass range, -1 meaning unbounded
    pub pass_range: [i32; 2],
    pub in_range: bool,
    pub kind: ActionKind,
}

impl Action {
    /// Returns an action valid for all experiments and passes.
    pub fn new(id: i32, kind: ActionKind) -> Self {
        Self {
            id,
            exp_range: [0, 0],
            pass_range: [-1, -1],
            in_range: true,
            kind,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }

    /// Returns whether the action's range includes experiment `exp_number` and pass `pass`.
    ///
    /// A pass of -1 matches any pass range.
    pub fn is_valid_for(&self, exp_number: i32, pass: i32) -> bool {
        let [e0, e1] = self.exp_range;
        let [p0, p1] = self.pass_range;
        (e0 == 0 || e0 <= exp_number)
            && (e1 == 0 || e1 >= exp_number)
            && (pass == -1 || ((p0 == -1 || p0 <= pass) && (p1 == -1 || p1 >= pass)))
    }
}

/// Result of selecting the actions to apply.
#[derive(Debug, PartialEq)]
pub enum Selection {
    /// There are no actions to apply
    Nothing,
    /// Apply these actions
    Apply(Actions),
}

/// Actions from the signal description and signal instance documents.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Actions {
    /// Actions from the signal description, range checked
    pub signal_desc: Vec<Action>,
    /// Actions from the signal instance, always in range
    pub signal: Vec<Action>,
}

impl Actions {
    /// Parse both documents and compute range validity for `(exp_number, pass)`.
    ///
    /// Either document may be empty.
    pub fn parse(
        signal_desc_xml: &str,
        signal_xml: &str,
        exp_number: i32,
        pass: i32,
    ) -> Result<Self, XmlError> {
        let mut signal_desc = xml::parse_actions(signal_desc_xml)?;
        for action in signal_desc.iter_mut() {
            action.in_range = action.is_valid_for(exp_number, pass);
        }
        let mut signal = xml::parse_actions(signal_xml)?;
        for action in signal.iter_mut() {
            action.in_range = true;
        }
        Ok(Self {
            signal_desc,
            signal,
        })
    }

    /// Disable description actions that share a type with an in-range instance action.
    pub fn deselect(&mut self) {
        for action in self.signal.iter().filter(|action| action.in_range) {
            let action_type = action.action_type();
            for desc_action in self
                .signal_desc
                .iter_mut()
                .filter(|desc_action| desc_action.action_type() == action_type)
            {
                desc_action.in_range = false;
            }
        }
    }

    /// Number of actions that are in range.
    pub fn count_in_range(&self) -> usize {
        self.signal_desc
            .iter()
            .chain(self.signal.iter())
            .filter(|action| action.in_range)
            .count()
    }

    /// Deselect, then report whether anything remains to be applied.
    pub fn select(mut self) -> Selection {
        self.deselect();
        if self.count_in_range() == 0 {
            Selection::Nothing
        } else {
            Selection::Apply(self)
        }
    }

    /// In-range actions in application order: description actions first, then instance actions.
    pub fn in_range(&self) -> impl Iterator<Item = &Action> {
        self.signal_desc
            .iter()
            .chain(self.signal.iter())
            .filter(|action| action.in_range)
    }

    /// The composite definition in effect: the first in range, description actions first.
    pub fn composite(&self) -> Option<&Composite> {
        self.signal_desc
            .iter()
            .chain(self.signal.iter())
            .filter(|action| action.in_range)
            .find_map(|action| match &action.kind {
                ActionKind::Composite(composite) => Some(composite),
                _ => None,
            })
    }

    /// In-range subset actions in application order.
    pub fn subsets(&self) -> impl Iterator<Item = &SubsetAction> {
        self.in_range().filter_map(|action| match &action.kind {
            ActionKind::Subset(subset) => Some(subset),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranged(kind: ActionKind, exp_range: [i32; 2], pass_range: [i32; 2]) -> Action {
        Action {
            exp_range,
            pass_range,
            ..Action::new(1, kind)
        }
    }

    fn offset() -> ActionKind {
        ActionKind::TimeOffset(TimeOffset::default())
    }

    #[test]
    fn unbounded_range() {
        let action = Action::new(1, offset());
        assert!(action.is_valid_for(0, -1));
        assert!(action.is_valid_for(99999, 7));
    }

    #[test]
    fn exp_range() {
        let action = ranged(offset(), [100, 200], [-1, -1]);
        assert!(!action.is_valid_for(99, -1));
        assert!(action.is_valid_for(100, -1));
        assert!(action.is_valid_for(200, 3));
        assert!(!action.is_valid_for(201, -1));
    }

    #[test]
    fn open_ended_exp_range() {
        let action = ranged(offset(), [100, 0], [-1, -1]);
        assert!(action.is_valid_for(1_000_000, -1));
        assert!(!action.is_valid_for(50, -1));
    }

    #[test]
    fn pass_range() {
        let action = ranged(offset(), [0, 0], [2, 4]);
        assert!(action.is_valid_for(1, -1));
        assert!(!action.is_valid_for(1, 1));
        assert!(action.is_valid_for(1, 2));
        assert!(action.is_valid_for(1, 4));
        assert!(!action.is_valid_for(1, 5));
        let action = ranged(offset(), [0, 0], [-1, 4]);
        assert!(action.is_valid_for(1, 0));
    }

    #[test]
    fn deselection() {
        let mut actions = Actions {
            signal_desc: vec![
                Action::new(1, offset()),
                Action::new(2, ActionKind::Calibration(Calibration::default())),
            ],
            signal: vec![Action::new(3, offset())],
        };
        actions.deselect();
        assert!(!actions.signal_desc[0].in_range);
        assert!(actions.signal_desc[1].in_range);
        assert!(actions.signal[0].in_range);
        let ids: Vec<i32> = actions.in_range().map(|action| action.id).collect();
        assert_eq!(vec![2, 3], ids);
    }

    #[test]
    fn deselection_ignores_out_of_range_signal_actions() {
        let mut signal_action = Action::new(2, offset());
        signal_action.in_range = false;
        let mut actions = Actions {
            signal_desc: vec![Action::new(1, offset())],
            signal: vec![signal_action],
        };
        actions.deselect();
        assert!(actions.signal_desc[0].in_range);
    }

    #[test]
    fn select_nothing() {
        assert_eq!(Selection::Nothing, Actions::default().select());
        let mut out_of_range = Action::new(1, offset());
        out_of_range.in_range = false;
        let actions = Actions {
            signal_desc: vec![out_of_range],
            signal: vec![],
        };
        assert_eq!(Selection::Nothing, actions.select());
    }

    #[test]
    fn select_apply() {
        let actions = Actions {
            signal_desc: vec![],
            signal: vec![Action::new(1, offset())],
        };
        assert!(matches!(actions.select(), Selection::Apply(_)));
    }

    #[test]
    fn composite_priority() {
        let desc = Composite {
            data_signal: "desc".to_string(),
            ..Default::default()
        };
        let signal = Composite {
            data_signal: "signal".to_string(),
            ..Default::default()
        };
        let actions = Actions {
            signal_desc: vec![Action::new(1, ActionKind::Composite(desc))],
            signal: vec![Action::new(2, ActionKind::Composite(signal))],
        };
        assert_eq!("desc", actions.composite().unwrap().data_signal);

        let mut actions = actions;
        actions.signal_desc[0].in_range = false;
        assert_eq!("signal", actions.composite().unwrap().data_signal);
    }

    #[test]
    fn calibration_target() {
        assert_eq!(Some(CalibrationTarget::AsError), CalibrationTarget::parse("ASError"));
        assert_eq!(None, CalibrationTarget::parse("dim"));
        assert!(CalibrationTarget::All.includes_aserror());
        assert!(!CalibrationTarget::Data.includes_error());
    }

    #[test]
    fn action_type_display() {
        assert_eq!("time_offset", ActionType::TimeOffset.to_string());
        assert_eq!(ActionType::Map, ActionKind::Map(MapAction::default()).action_type());
    }
}

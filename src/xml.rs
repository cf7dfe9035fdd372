//! Correction action XML documents.
//!
//! A document looks like:
//!
//! ```xml
//! <action>
//!   <signal>
//!     <calibration id="1" exp_number_start="100" target="data">
//!       <factor scale="milli">2.5</factor>
//!       <units>V</units>
//!     </calibration>
//!     <time_offset value="-20" scale="milli" method="0"/>
//!   </signal>
//! </action>
//! ```
//!
//! Actions are returned in type order within each `<signal>` group: composite, documentation,
//! calibration, time offset, error model, subset.

use crate::actions::{
    Action, ActionKind, Calibration, CalibrationTarget, Composite, DimCalibration, DimComposite,
    DimDocumentation, DimErrorModel, Documentation, ErrorModelAction, MapAction, MapDim,
    OffsetMethod, SubsetAction, TimeOffset,
};
use crate::error::XmlError;
use crate::subset::{Subset, SubsetDim};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::FromStr;

/// A parsed XML element.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Node {
    fn from_start(start: &BytesStart) -> Result<Self, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_ascii_lowercase();
        let mut attributes = vec![];
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key =
                String::from_utf8_lossy(attribute.key.local_name().as_ref()).to_ascii_lowercase();
            let value = attribute.unescape_value()?.trim().to_string();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    /// Returns a non-empty attribute value.
    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    fn children<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a Node> + 'b
    where
        'a: 'b,
    {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Returns the text of the first child element `name`, if non-empty.
    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|child| child.text.trim())
            .filter(|text| !text.is_empty())
    }

    /// Returns the text of a child element, or an empty string.
    fn string(&self, name: &str) -> String {
        self.child_text(name).unwrap_or_default().to_string()
    }

    /// Parse an attribute, returning `None` if it is absent or empty.
    fn parse_attr<T: FromStr>(&self, name: &str) -> Result<Option<T>, XmlError> {
        self.attr(name).map(|value| parse_value(name, value)).transpose()
    }

    /// Parse a scaled numeric child element such as `<factor scale="micro">3</factor>`.
    fn scaled_value(&self, name: &str) -> Result<Option<f64>, XmlError> {
        let Some(child) = self.child(name) else {
            return Ok(None);
        };
        let text = child.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let value: f64 = parse_value(name, text)?;
        Ok(Some(value * scale_factor(child.attr("scale"))))
    }

    /// Parse a list of floats, either a comma separated attribute or a whitespace separated
    /// child element.
    fn float_list(&self, name: &str) -> Result<Vec<f32>, XmlError> {
        if self.attr(name).is_some() {
            return self.attr_list(name);
        }
        self.child_text(name)
            .map(|text| {
                text.split_whitespace()
                    .map(|item| parse_value(name, item))
                    .collect()
            })
            .unwrap_or_else(|| Ok(vec![]))
    }

    /// Parse a comma separated list attribute.
    fn attr_list<T: FromStr>(&self, name: &str) -> Result<Vec<T>, XmlError> {
        self.attr(name)
            .map(|text| {
                text.split(',')
                    .map(|item| parse_value(name, item.trim()))
                    .collect()
            })
            .unwrap_or_else(|| Ok(vec![]))
    }

    fn flag(&self, name: &str) -> bool {
        self.attr(name).map(is_yes).unwrap_or(false)
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, XmlError> {
    value.parse().map_err(|_| XmlError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Flags are set by any value starting with `y`.
fn is_yes(value: &str) -> bool {
    value.starts_with(['y', 'Y'])
}

/// Multiplier of a `scale` attribute. Unrecognised scales leave values unchanged.
fn scale_factor(scale: Option<&str>) -> f64 {
    match scale.map(str::to_ascii_lowercase).as_deref() {
        Some("milli") => 1.0e-3,
        Some("micro") => 1.0e-6,
        Some("nano") => 1.0e-9,
        _ => 1.0,
    }
}

/// Parse a document into its root element. Returns `None` for an empty document.
fn parse_document(xml: &str) -> Result<Option<Node>, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Node> = vec![];
    let mut root = None;
    loop {
        let closed = match reader.read_event()? {
            Event::Start(start) => {
                stack.push(Node::from_start(&start)?);
                None
            }
            Event::Empty(start) => Some(Node::from_start(&start)?),
            Event::End(_) => Some(stack.pop().ok_or(XmlError::Truncated)?),
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape()?);
                }
                None
            }
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };
        if let Some(node) = closed {
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None if root.is_none() => root = Some(node),
                None => {}
            }
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::Truncated);
    }
    Ok(root)
}

/// Parse a correction action document.
///
/// An empty document yields no actions. The range of each action is read but not checked.
pub fn parse_actions(xml: &str) -> Result<Vec<Action>, XmlError> {
    if xml.trim().is_empty() {
        return Ok(vec![]);
    }
    let Some(root) = parse_document(xml)? else {
        return Ok(vec![]);
    };
    if root.name != "action" {
        return Err(XmlError::UnexpectedRoot(root.name));
    }
    let mut actions: Vec<Action> = vec![];
    for signal in root.children("signal") {
        for node in signal.children("composite") {
            actions.push(ranged(node, ActionKind::Composite(composite(node)?))?);
        }
        for node in signal.children("documentation") {
            actions.push(ranged(node, ActionKind::Documentation(documentation(node)?))?);
        }
        for node in signal.children("calibration") {
            actions.push(ranged(node, ActionKind::Calibration(calibration(node)?))?);
        }
        for node in signal.children("time_offset") {
            actions.push(ranged(node, ActionKind::TimeOffset(time_offset(node)?))?);
        }
        for node in signal.children("errormodel") {
            actions.push(ranged(node, ActionKind::ErrorModel(error_model(node)?))?);
        }
        for node in signal.children("subset") {
            actions.push(ranged(node, ActionKind::Subset(subset(node)?))?);
        }
        for node in signal.children("map") {
            actions.push(ranged(node, ActionKind::Map(map(node)?))?);
        }
    }
    for (i, action) in actions.iter_mut().enumerate() {
        if action.id == 0 {
            action.id = i as i32 + 1;
        }
    }
    Ok(actions)
}

/// Wrap an action payload with the id and range attributes of its element.
fn ranged(node: &Node, kind: ActionKind) -> Result<Action, XmlError> {
    let mut action = Action::new(node.parse_attr("id")?.unwrap_or(0), kind);
    if let Some(start) = node.parse_attr("exp_number_start")? {
        action.exp_range[0] = start;
    }
    if let Some(end) = node.parse_attr("exp_number_end")? {
        action.exp_range[1] = end;
    }
    if let Some(start) = node.parse_attr("pass_start")? {
        action.pass_range[0] = start;
    }
    if let Some(end) = node.parse_attr("pass_end")? {
        action.pass_range[1] = end;
    }
    Ok(action)
}

fn documentation(node: &Node) -> Result<Documentation, XmlError> {
    let dimensions = node
        .children("dimension")
        .map(|dim| {
            Ok(DimDocumentation {
                dimid: dim.parse_attr("dimid")?.unwrap_or(0),
                label: dim.string("label"),
                units: dim.string("units"),
            })
        })
        .collect::<Result<_, XmlError>>()?;
    Ok(Documentation {
        label: node.string("label"),
        units: node.string("units"),
        description: node.string("description"),
        dimensions,
    })
}

fn calibration(node: &Node) -> Result<Calibration, XmlError> {
    let defaults = Calibration::default();
    let target = match node.attr("target") {
        Some(target) => Some(CalibrationTarget::parse(target).ok_or_else(|| {
            XmlError::InvalidValue {
                name: "target".to_string(),
                value: target.to_string(),
            }
        })?),
        None => None,
    };
    let dimensions = node
        .children("dimension")
        .map(|dim| {
            Ok(DimCalibration {
                dimid: dim.parse_attr("dimid")?.unwrap_or(0),
                factor: dim.scaled_value("factor")?.unwrap_or(defaults.factor),
                offset: dim.scaled_value("offset")?.unwrap_or(defaults.offset),
                invert: dim.flag("invert"),
                units: dim.string("units"),
            })
        })
        .collect::<Result<_, XmlError>>()?;
    Ok(Calibration {
        target,
        factor: node.scaled_value("factor")?.unwrap_or(defaults.factor),
        offset: node.scaled_value("offset")?.unwrap_or(defaults.offset),
        invert: node.flag("invert"),
        units: node.string("units"),
        dimensions,
    })
}

fn time_offset(node: &Node) -> Result<TimeOffset, XmlError> {
    let method = match node.parse_attr::<i64>("method")? {
        Some(number) => OffsetMethod::from_number(number).ok_or_else(|| XmlError::InvalidValue {
            name: "method".to_string(),
            value: number.to_string(),
        })?,
        None => OffsetMethod::default(),
    };
    // `start` is an alias of `value`.
    let offset = match node.parse_attr::<f64>("start")? {
        Some(start) => Some(start),
        None => node.parse_attr::<f64>("value")?,
    };
    Ok(TimeOffset {
        method,
        offset: offset.unwrap_or(0.0) * scale_factor(node.attr("scale")),
        interval: node.parse_attr("interval")?.unwrap_or(0.0),
    })
}

fn error_model(node: &Node) -> Result<ErrorModelAction, XmlError> {
    let dimensions = node
        .children("dimension")
        .map(|dim| {
            Ok(DimErrorModel {
                dimid: dim.parse_attr("dimid")?.unwrap_or(0),
                model: dim.parse_attr("model")?.unwrap_or(0),
                params: dim.float_list("params")?,
            })
        })
        .collect::<Result<_, XmlError>>()?;
    Ok(ErrorModelAction {
        model: node.parse_attr("model")?.unwrap_or(0),
        params: node.float_list("params")?,
        dimensions,
    })
}

fn subset(node: &Node) -> Result<SubsetAction, XmlError> {
    let operations: Vec<String> = node.attr_list("operation")?;
    let bounds: Vec<f64> = node.attr_list("bound")?;
    let dimids: Vec<usize> = node.attr_list("dimid")?;
    let dims = operations
        .iter()
        .enumerate()
        .map(|(i, operation)| {
            let dimid = dimids.get(i).copied().unwrap_or(i);
            SubsetDim::from_operation(dimid, operation, bounds.get(i).copied()).map_err(|_| {
                XmlError::InvalidValue {
                    name: "operation".to_string(),
                    value: operation.clone(),
                }
            })
        })
        .collect::<Result<_, XmlError>>()?;
    let subset = Subset { dims };
    subset
        .check_rank()
        .map_err(|error| XmlError::InvalidValue {
            name: "operation".to_string(),
            value: error.to_string(),
        })?;
    Ok(SubsetAction {
        subset,
        data_signal: node.attr("data").unwrap_or_default().to_string(),
        member: node.attr("member").unwrap_or_default().to_string(),
        function: node.attr("function").unwrap_or_default().to_string(),
        reform: node.flag("reform"),
        order: node.parse_attr("order")?,
    })
}

fn map(node: &Node) -> Result<MapAction, XmlError> {
    let mappings: Vec<String> = node.attr_list("mapping")?;
    let values: Vec<f64> = node.attr_list("value")?;
    let dimids: Vec<usize> = node.attr_list("dimid")?;
    let mappings = mappings
        .into_iter()
        .enumerate()
        .map(|(i, mapping)| MapDim {
            dimid: dimids.get(i).copied().unwrap_or(i),
            mapping,
            value: values.get(i).copied().unwrap_or_default(),
        })
        .collect();
    Ok(MapAction {
        data_signal: node.attr("data").unwrap_or_default().to_string(),
        mappings,
    })
}

fn composite(node: &Node) -> Result<Composite, XmlError> {
    let dimensions = node
        .children("composite_dim")
        .map(|dim| {
            Ok(DimComposite {
                to_dim: dim.parse_attr("to_dim")?,
                from_dim: dim.parse_attr("from_dim")?,
                file: dim.attr("file").unwrap_or_default().to_string(),
                format: dim.attr("format").unwrap_or_default().to_string(),
                dim_signal: dim
                    .attr("dim")
                    .or_else(|| dim.attr("data"))
                    .unwrap_or_default()
                    .to_string(),
                dim_error: dim.attr("error").unwrap_or_default().to_string(),
                dim_aserror: dim.attr("aserror").unwrap_or_default().to_string(),
            })
        })
        .collect::<Result<_, XmlError>>()?;
    let subsets: Vec<SubsetAction> = node.children("subset").map(subset).collect::<Result<_, _>>()?;
    let maps = node.children("map").map(map).collect::<Result<_, _>>()?;
    // Without a data signal, the first subset's signal is the source.
    let data_signal = match node.attr("data") {
        Some(data) => data.to_string(),
        None => subsets
            .first()
            .map(|subset| subset.data_signal.clone())
            .unwrap_or_default(),
    };
    Ok(Composite {
        file: node.attr("file").unwrap_or_default().to_string(),
        format: node.attr("format").unwrap_or_default().to_string(),
        data_signal,
        error_signal: node.attr("error").unwrap_or_default().to_string(),
        aserror_signal: node.attr("aserror").unwrap_or_default().to_string(),
        map_to_signal: node.attr("mapto").unwrap_or_default().to_string(),
        order: node.parse_attr("order")?,
        dimensions,
        subsets,
        maps,
    })
}

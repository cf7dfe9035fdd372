//! Signal and source address parsing.
//!
//! A client addresses data with two strings. The source names where the data live:
//!
//! * `[device::][archive::]12345[/pass]` an experiment number and optional pass
//! * `[device::][format::]/path/to/file` a file, possibly containing `$VAR` tokens
//! * `[device::][plugin::]function(args)` a plugin function
//! * `device` a bare device name
//!
//! The signal names what to read:
//!
//! * `[archive::]name[subset]`
//! * `[plugin::]function(args)[subset]`
//! * `ss::subset("archive::name", [subset], reform, member=m, function=f)` server-side subsetting
//! * `<?xml ...` a literal composite signal definition

use crate::actions::{ServerSide, SubsetAction};
use crate::error::ParseError;
use crate::models::{Environment, RequestData, RequestKind, STRING_LENGTH};
use crate::name_value::{parse_name_values, substitute_placeholders};
use crate::plugin::PluginRegistry;
use crate::subset::Subset;

use expanduser::expanduser;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::path::Path;
use tracing::{event, Level};

lazy_static! {
    static ref PULSE: Regex = Regex::new(r"^(\d+)(?:/(.*))?$").unwrap();
    static ref PATH: Regex = Regex::new(r"^(?:/|\./|\.\./|~|\$)[^\s]*$").unwrap();
    static ref FUNCTION: Regex =
        Regex::new(r"(?is)^([a-z_][a-z0-9_]*)\s*\((.*)\)\s*((?:\[[^\[\]]*\]\s*)*)$").unwrap();
    static ref DEVICE: Regex = Regex::new(r"(?i)^[a-z0-9_.\-]+$").unwrap();
    static ref NAME: Regex =
        Regex::new(r"(?i)^([a-z0-9_/.\-]+)\s*((?:\[[^\[\]]*\]\s*)*)$").unwrap();
    static ref VARIABLE: Regex = Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// Prefix of literal XML signals.
const XML_PREFIX: &str = "<?xml";

/// Archive names of server-side subset requests.
const SERVER_SIDE_ARCHIVES: [&str; 2] = ["ss", "serverside"];

/// Parser of signal and source addresses
///
/// The parser uses the environment for default prefixes and the delimiter, and the plugin
/// registry to resolve format names and file extensions.
pub struct AddressParser<'a> {
    environment: &'a Environment,
    registry: &'a PluginRegistry,
}

/// Source plugin resolution, applied to plain signals.
#[derive(Debug, PartialEq)]
enum SourcePlugin {
    None,
    Known(usize),
    Unknown,
}

impl<'a> AddressParser<'a> {
    pub fn new(environment: &'a Environment, registry: &'a PluginRegistry) -> Self {
        Self {
            environment,
            registry,
        }
    }

    /// Parse a signal and source into a request.
    pub fn parse(&self, signal: &str, source: &str) -> Result<RequestData, ParseError> {
        let signal = signal.trim();
        let source = source.trim();
        check_length("signal", signal)?;
        check_length("source", source)?;
        if signal.is_empty() && source.is_empty() {
            return Err(ParseError::EmptyRequest);
        }
        let mut request = RequestData {
            pass: -1,
            delimiter: self.environment.delimiter.clone(),
            ..Default::default()
        };
        let source_plugin = self.parse_source(source, &mut request)?;
        if signal.starts_with(XML_PREFIX) {
            request.request = RequestKind::ReadXml;
            request.signal = signal.to_string();
        } else {
            self.parse_signal(signal, source_plugin, &mut request)?;
        }
        event!(
            Level::DEBUG,
            request = %request.request,
            exp_number = request.exp_number,
            archive = %request.archive,
            signal = %request.signal,
            "parsed address"
        );
        Ok(request)
    }

    /// Split `text` on the delimiter, ignoring any part inside parentheses or brackets.
    fn split_prefixes<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let delimiter = self.environment.delimiter.as_str();
        let head_end = text.find(['(', '[']).unwrap_or(text.len());
        let mut tokens: Vec<&str> = text[..head_end].split(delimiter).collect();
        if let Some(last) = tokens.last_mut() {
            let start = head_end - last.len();
            *last = &text[start..];
        }
        tokens
    }

    fn parse_source(
        &self,
        source: &str,
        request: &mut RequestData,
    ) -> Result<SourcePlugin, ParseError> {
        let delimiter = self.environment.delimiter.as_str();
        let mut source = source;
        let default_device = &self.environment.default_device;
        if !default_device.is_empty() {
            let prefix = format!("{default_device}{delimiter}");
            if source.len() >= prefix.len()
                && source.is_char_boundary(prefix.len())
                && source[..prefix.len()].eq_ignore_ascii_case(&prefix)
            {
                source = &source[prefix.len()..];
            }
        }
        let source = source.strip_suffix(delimiter).unwrap_or(source).trim();
        request.source = source.to_string();
        if source.is_empty() {
            return Ok(SourcePlugin::None);
        }
        let mut tokens = self.split_prefixes(source);
        let body = tokens.pop().unwrap_or_default().trim();
        let prefixes: Vec<String> = tokens.iter().map(|token| token.trim().to_string()).collect();
        if prefixes.len() > 2 {
            return Err(ParseError::TooManyPrefixes(source.to_string()));
        }
        let invalid = || ParseError::InvalidSource(source.to_string());

        if let Some(captures) = PULSE.captures(body) {
            match prefixes.as_slice() {
                [] => {}
                [device] => request.device = device.clone(),
                _ => return Err(invalid()),
            }
            request.exp_number = parse_int("exp_number", &captures[1])?;
            if let Some(tpass) = captures.get(2) {
                request.tpass = tpass.as_str().trim().to_string();
                if !request.tpass.is_empty() && request.tpass.bytes().all(|b| b.is_ascii_digit()) {
                    request.pass = parse_int("pass", &request.tpass)?;
                }
            }
            return Ok(SourcePlugin::None);
        }

        if PATH.is_match(body) {
            match prefixes.as_slice() {
                [] => {}
                [format] => request.format = format.clone(),
                [device, format] => {
                    request.device = device.clone();
                    request.format = format.clone();
                }
                _ => return Err(invalid()),
            }
            request.path = expand_path(body)?;
            check_length("path", &request.path)?;
            request.file = Path::new(&request.path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !request.format.is_empty() {
                return Ok(match self.registry.find_by_format(&request.format) {
                    Some(id) => SourcePlugin::Known(id),
                    None => SourcePlugin::Unknown,
                });
            }
            let plugin = Path::new(&request.path)
                .extension()
                .and_then(|extension| self.registry.find_by_extension(&extension.to_string_lossy()));
            if let Some(id) = plugin {
                if let Some(plugin) = self.registry.get(id) {
                    request.format = plugin.format().to_string();
                }
                return Ok(SourcePlugin::Known(id));
            }
            return Ok(SourcePlugin::None);
        }

        if let Some(captures) = FUNCTION.captures(body) {
            let plugin = match prefixes.as_slice() {
                [] => String::new(),
                [plugin] => plugin.clone(),
                [device, plugin] => {
                    request.device = device.clone();
                    plugin.clone()
                }
                _ => return Err(invalid()),
            };
            request.function = captures[1].to_string();
            request.name_values = parse_name_values(&captures[2], true)?;
            if plugin.is_empty() {
                return Ok(SourcePlugin::Unknown);
            }
            request.format = plugin;
            return Ok(match self.registry.find_by_format(&request.format) {
                Some(id) => SourcePlugin::Known(id),
                None => SourcePlugin::Unknown,
            });
        }

        if prefixes.is_empty() && DEVICE.is_match(body) {
            request.device = body.to_string();
            return Ok(SourcePlugin::None);
        }
        Err(invalid())
    }

    fn parse_signal(
        &self,
        signal: &str,
        source_plugin: SourcePlugin,
        request: &mut RequestData,
    ) -> Result<(), ParseError> {
        let mut tokens = self.split_prefixes(signal);
        let body = tokens.pop().unwrap_or_default().trim();
        let archive = match tokens.as_slice() {
            [] => "",
            [archive] => archive.trim(),
            _ => return Err(ParseError::InvalidSignal(signal.to_string())),
        };
        if body.is_empty() {
            if signal.is_empty() {
                return Ok(());
            }
            return Err(ParseError::InvalidSignal(signal.to_string()));
        }

        if let Some(captures) = FUNCTION.captures(body) {
            let function = &captures[1];
            if SERVER_SIDE_ARCHIVES
                .iter()
                .any(|name| name.eq_ignore_ascii_case(archive))
                && function.eq_ignore_ascii_case("subset")
            {
                return self.parse_server_side(signal, &captures[2], source_plugin, request);
            }
            request.archive = String::new();
            request.function = function.to_string();
            request.signal = body.to_string();
            let mut name_values = parse_name_values(&captures[2], true)?;
            substitute_placeholders(&mut name_values, &request.tpass)?;
            request.name_values = name_values;
            set_subset(request, &captures, 3)?;
            request.format = archive.to_string();
            request.request = match self.registry.find_by_format(archive) {
                Some(id) => RequestKind::Plugin(id),
                None => RequestKind::ReadUnknown,
            };
            return Ok(());
        }

        let Some(captures) = NAME.captures(body) else {
            return Err(ParseError::InvalidSignal(signal.to_string()));
        };
        request.signal = captures[1].to_string();
        set_subset(request, &captures, 2)?;
        request.archive = if archive.is_empty() {
            self.environment.default_archive.clone()
        } else {
            archive.to_string()
        };
        request.request = match source_plugin {
            SourcePlugin::Known(id) => RequestKind::Plugin(id),
            SourcePlugin::Unknown => RequestKind::ReadUnknown,
            SourcePlugin::None if self.environment.proxy => {
                request.server = request.device.clone();
                RequestKind::ReadRemote
            }
            SourcePlugin::None => RequestKind::ReadGeneric,
        };
        check_length("archive", &request.archive)?;
        Ok(())
    }

    /// Parse `ss::subset("archive::name", [subset], reform, member=m, function=f)`.
    fn parse_server_side(
        &self,
        signal: &str,
        args: &str,
        source_plugin: SourcePlugin,
        request: &mut RequestData,
    ) -> Result<(), ParseError> {
        let mut inner = None;
        let mut subset_text = String::new();
        let mut action = SubsetAction::default();
        for nv in parse_name_values(args, true)? {
            if nv.is_keyword() {
                let name = strip_quotes(&nv.name);
                if name.starts_with('[') {
                    subset_text.push_str(name);
                } else if name.eq_ignore_ascii_case("reform") {
                    action.reform = true;
                } else if inner.is_none() {
                    inner = Some(name.to_string());
                } else {
                    return Err(ParseError::InvalidSignal(signal.to_string()));
                }
                continue;
            }
            match nv.name.to_ascii_lowercase().as_str() {
                "member" => action.member = nv.value,
                "function" => action.function = nv.value,
                "signal" | "data" => inner = Some(nv.value),
                "reform" => action.reform = nv.value.eq_ignore_ascii_case("true"),
                _ => return Err(ParseError::InvalidToken(nv.pair)),
            }
        }
        let Some(inner) = inner else {
            return Err(ParseError::InvalidSignal(signal.to_string()));
        };
        action.subset = Subset::parse(&subset_text)?;
        action.data_signal = inner.clone();
        self.parse_signal(&inner, source_plugin, request)?;
        request.server_side = Some(ServerSide {
            subsets: vec![action],
            maps: vec![],
        });
        Ok(())
    }
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|text| text.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

fn set_subset(request: &mut RequestData, captures: &Captures, group: usize) -> Result<(), ParseError> {
    let subset = captures.get(group).map(|m| m.as_str().trim()).unwrap_or_default();
    request.subset = subset.to_string();
    request.datasubset = Subset::parse(subset)?;
    Ok(())
}

fn check_length(field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.len() > STRING_LENGTH {
        return Err(ParseError::StringTooLong {
            field,
            length: value.len(),
            max: STRING_LENGTH,
        });
    }
    Ok(())
}

/// Parse a string of digits into an `i32`.
fn parse_int(field: &'static str, digits: &str) -> Result<i32, ParseError> {
    let value = digits.parse::<i64>().unwrap_or(i64::MAX);
    i32::try_from(value).map_err(|_| ParseError::IntTooLarge { field, value })
}

/// Expand `$NAME` and `${NAME}` tokens from the process environment.
///
/// Unknown variables expand to the empty string. When the expanded path is an existing
/// directory it is canonicalised.
fn expand_path(path: &str) -> Result<String, ParseError> {
    if !path.contains('$') && !path.starts_with('~') {
        return Ok(path.to_string());
    }
    let expanded = VARIABLE.replace_all(path, |captures: &Captures| {
        let name = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    });
    let expanded = expanduser(&expanded)
        .map_err(|error| ParseError::PathExpansion {
            path: path.to_string(),
            reason: error.to_string(),
        })?
        .to_string_lossy()
        .into_owned();
    if Path::new(&expanded).is_dir() {
        if let Ok(canonical) = std::fs::canonicalize(&expanded) {
            return Ok(canonical.to_string_lossy().into_owned());
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subset::{Comparison, SubsetDim, SubsetOperation};
    use crate::test_utils;

    fn parse(signal: &str, source: &str) -> Result<RequestData, ParseError> {
        let registry = test_utils::get_test_registry();
        let environment = Environment::default();
        AddressParser::new(&environment, &registry).parse(signal, source)
    }

    fn parse_with(
        environment: &Environment,
        signal: &str,
        source: &str,
    ) -> Result<RequestData, ParseError> {
        let registry = test_utils::get_test_registry();
        AddressParser::new(environment, &registry).parse(signal, source)
    }

    #[test]
    fn empty_request() {
        assert_eq!(Err(ParseError::EmptyRequest), parse("  ", ""));
    }

    #[test]
    fn generic_pulse() {
        let request = parse("efm::ipla", "12345").unwrap();
        assert_eq!(RequestKind::ReadGeneric, request.request);
        assert_eq!("efm", request.archive);
        assert_eq!("ipla", request.signal);
        assert_eq!(12345, request.exp_number);
        assert_eq!(-1, request.pass);
        assert_eq!("", request.tpass);
        assert!(request.datasubset.is_empty());
    }

    #[test]
    fn pulse_and_pass() {
        let request = parse("ip", "12345/2").unwrap();
        assert_eq!(2, request.pass);
        assert_eq!("2", request.tpass);
        let request = parse("ip", "12345/LATEST").unwrap();
        assert_eq!(-1, request.pass);
        assert_eq!("LATEST", request.tpass);
    }

    #[test]
    fn device_prefix() {
        let request = parse("ip", "MAST::12345").unwrap();
        assert_eq!("MAST", request.device);
        assert_eq!(12345, request.exp_number);
    }

    #[test]
    fn default_device_stripped() {
        let environment = Environment {
            default_device: "MAST".to_string(),
            ..Default::default()
        };
        let request = parse_with(&environment, "ip", "mast::12345").unwrap();
        assert_eq!("", request.device);
        assert_eq!(12345, request.exp_number);
    }

    #[test]
    fn trailing_delimiter_ignored() {
        let request = parse("ip", "12345::").unwrap();
        assert_eq!(12345, request.exp_number);
    }

    #[test]
    fn too_many_prefixes() {
        assert_eq!(
            Err(ParseError::TooManyPrefixes("a::b::c::12345".to_string())),
            parse("ip", "a::b::c::12345")
        );
    }

    #[test]
    fn two_prefixes_on_pulse_invalid() {
        assert_eq!(
            Err(ParseError::InvalidSource("a::b::12345".to_string())),
            parse("ip", "a::b::12345")
        );
    }

    #[test]
    fn exp_number_too_large() {
        assert!(matches!(
            parse("ip", "99999999999"),
            Err(ParseError::IntTooLarge {
                field: "exp_number",
                ..
            })
        ));
    }

    #[test]
    fn string_too_long() {
        let signal = "a".repeat(STRING_LENGTH + 1);
        assert!(matches!(
            parse(&signal, "1"),
            Err(ParseError::StringTooLong { field: "signal", .. })
        ));
    }

    #[test]
    fn default_archive() {
        let environment = Environment {
            default_archive: "MAST".to_string(),
            ..Default::default()
        };
        let request = parse_with(&environment, "ip", "1").unwrap();
        assert_eq!("MAST", request.archive);
    }

    #[test]
    fn proxy() {
        let environment = Environment {
            proxy: true,
            ..Default::default()
        };
        let request = parse_with(&environment, "ip", "remote::1").unwrap();
        assert_eq!(RequestKind::ReadRemote, request.request);
        assert_eq!("remote", request.server);
    }

    #[test]
    fn signal_subset() {
        let request = parse("efm::psi[0:10][*, 3]", "1").unwrap();
        assert_eq!("psi", request.signal);
        assert_eq!("[0:10][*, 3]", request.subset);
        assert_eq!(3, request.datasubset.nbound());
        assert_eq!(
            SubsetDim::slice(0, Some(0), Some(10), None),
            request.datasubset.dims[0]
        );
    }

    #[test]
    fn invalid_signal() {
        assert!(matches!(
            parse("efm::ip lasma", "1"),
            Err(ParseError::InvalidSignal(_))
        ));
        assert!(matches!(
            parse("a::b::c", "1"),
            Err(ParseError::InvalidSignal(_))
        ));
    }

    #[test]
    fn path_with_format() {
        let request = parse("ip", "JSON::/data/shots/12345.dat").unwrap();
        assert_eq!("/data/shots/12345.dat", request.path);
        assert_eq!("12345.dat", request.file);
        assert_eq!("JSON", request.format);
        assert!(matches!(request.request, RequestKind::Plugin(_)));
    }

    #[test]
    fn path_with_device_and_format() {
        let request = parse("ip", "MAST::JSON::/data/a.dat").unwrap();
        assert_eq!("MAST", request.device);
        assert_eq!("JSON", request.format);
    }

    #[test]
    fn path_with_extension() {
        let registry = test_utils::get_test_registry();
        let request = parse("ip", "/data/a.json").unwrap();
        assert_eq!(
            RequestKind::Plugin(registry.find_by_format("JSON").unwrap()),
            request.request
        );
        assert_eq!("JSON", request.format);
    }

    #[test]
    fn path_with_unknown_format() {
        let request = parse("ip", "NETCDF::/data/a.nc").unwrap();
        assert_eq!(RequestKind::ReadUnknown, request.request);
    }

    #[test]
    fn path_without_format() {
        let request = parse("ip", "/data/a.nc").unwrap();
        assert_eq!(RequestKind::ReadGeneric, request.request);
    }

    #[test]
    fn path_variables() {
        std::env::set_var("SIGNAL_RESOLVER_TEST_ROOT", "/data");
        let request = parse("ip", "${SIGNAL_RESOLVER_TEST_ROOT}/a.dat").unwrap();
        assert_eq!("/data/a.dat", request.path);
        let request = parse("ip", "$SIGNAL_RESOLVER_TEST_UNSET/a.dat").unwrap();
        assert_eq!("/a.dat", request.path);
    }

    #[test]
    fn path_home_directories() {
        let home = std::env::var("HOME").unwrap();
        let request = parse("ip", "~/x.json").unwrap();
        assert_eq!(format!("{}/x.json", home.trim_end_matches('/')), request.path);
        assert_eq!("x.json", request.file);

        let expected = expanduser("~root/x.json").unwrap();
        let request = parse("ip", "~root/x.json").unwrap();
        assert_eq!(expected.to_string_lossy(), request.path);
        assert!(!request.path.starts_with('~'));

        assert!(matches!(
            parse("ip", "~no-such-user-here/x.json"),
            Err(ParseError::PathExpansion { .. })
        ));
    }

    #[test]
    fn server_side_comparison_subset() {
        let request = parse(r#"ss::subset("efm::ipla", [>=1.0e5])"#, "12345").unwrap();
        assert_eq!("ipla", request.signal);
        let subset = &request.server_side.unwrap().subsets[0].subset;
        assert_eq!(
            SubsetOperation::Compare(Comparison::Ge),
            subset.dims[0].operation
        );
        assert_eq!(Some(1.0e5), subset.dims[0].bound);

        let request = parse(r#"ss::subset("efm::ipla", [~=3])"#, "12345").unwrap();
        let subset = &request.server_side.unwrap().subsets[0].subset;
        assert_eq!(
            SubsetOperation::Compare(Comparison::Approx),
            subset.dims[0].operation
        );
        assert_eq!(Some(3.0), subset.dims[0].bound);
    }

    #[test]
    fn bare_device() {
        let request = parse("ip", "MAST").unwrap();
        assert_eq!("MAST", request.device);
        assert_eq!(0, request.exp_number);
    }

    #[test]
    fn invalid_source() {
        assert!(matches!(
            parse("ip", "not a source"),
            Err(ParseError::InvalidSource(_))
        ));
    }

    #[test]
    fn signal_function() {
        let registry = test_utils::get_test_registry();
        let request = parse(r#"store::get(signal="ip", scale=2)[0:4]"#, "").unwrap();
        assert_eq!(
            RequestKind::Plugin(registry.find_by_format("STORE").unwrap()),
            request.request
        );
        assert_eq!("", request.archive);
        assert_eq!("get", request.function);
        assert_eq!(Some("ip"), request.name_value("signal"));
        assert_eq!(Some("2"), request.name_value("scale"));
        assert_eq!("[0:4]", request.subset);
    }

    #[test]
    fn signal_function_unknown_plugin() {
        let request = parse("nope::get(x=1)", "").unwrap();
        assert_eq!(RequestKind::ReadUnknown, request.request);
    }

    #[test]
    fn signal_function_placeholders() {
        let request = parse("store::get(signal=$1, run=$run)", "12345/ip, run=4").unwrap();
        assert_eq!(Some("ip"), request.name_value("signal"));
        assert_eq!(Some("4"), request.name_value("run"));
    }

    #[test]
    fn source_function() {
        let registry = test_utils::get_test_registry();
        let request = parse("ip", "store::read(shot=1)").unwrap();
        assert_eq!("read", request.function);
        assert_eq!(
            RequestKind::Plugin(registry.find_by_format("STORE").unwrap()),
            request.request
        );
        assert_eq!(Some("1"), request.name_value("shot"));
    }

    #[test]
    fn literal_xml() {
        let xml = r#"<?xml version="1.0"?><action/>"#;
        let request = parse(xml, "12345").unwrap();
        assert_eq!(RequestKind::ReadXml, request.request);
        assert_eq!(xml, request.signal);
        assert_eq!(12345, request.exp_number);
    }

    #[test]
    fn server_side_subset() {
        let request = parse(
            r#"ss::subset("efm::psi", [0:10, *], reform, member=value, function=abs())"#,
            "12345",
        )
        .unwrap();
        assert_eq!(RequestKind::ReadGeneric, request.request);
        assert_eq!("efm", request.archive);
        assert_eq!("psi", request.signal);
        let server_side = request.server_side.unwrap();
        let action = &server_side.subsets[0];
        assert!(action.reform);
        assert_eq!("value", action.member);
        assert_eq!("abs()", action.function);
        assert_eq!("efm::psi", action.data_signal);
        assert_eq!(2, action.subset.nbound());
        assert_eq!(SubsetOperation::All, action.subset.dims[1].operation);
    }

    #[test]
    fn server_side_without_signal() {
        assert!(matches!(
            parse("serverside::subset([0:1])", "1"),
            Err(ParseError::InvalidSignal(_))
        ));
    }
}

//! Signal resolution.
//!
//! A request is resolved by fetching its data through a plugin, then, for signals with correction
//! metadata, splicing in component signals, applying corrections and finally subsetting. Derived
//! (composite) signals are resolved recursively, with the depth bounded per request.

use crate::actions::{Actions, Composite, DimComposite, SubsetAction};
use crate::address::AddressParser;
use crate::array::apply_subset;
use crate::corrections::{self, CorrectionOptions};
use crate::error::{
    CorrectionError, ParseError, PluginResolutionError, RangeError, ResolutionError,
    SubstitutionError,
};
use crate::metrics::record_resolution;
use crate::models::{
    ClientBlock, DataSource, Environment, Metadata, RequestData, RequestKind, SignalDesc,
    SignalKind,
};
use crate::plugin::{Fetched, PluginRegistry};
use crate::types::{DataBlock, Dim, DimCoords};

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use tracing::{event, span, Level};
use uuid::Uuid;

/// Prefix of literal XML signals.
const XML_PREFIX: &str = "<?xml";

/// Format names that mean "look the signal up in the catalogue".
const GENERIC_FORMATS: [&str; 2] = ["", "GENERIC"];

/// A resolved signal: corrected data and the catalogue metadata it was read with
#[derive(Debug)]
pub struct Resolved {
    pub block: DataBlock,
    pub metadata: Metadata,
}

/// State shared by every level of one resolution.
///
/// Created once per client request and passed by reference to recursive calls.
#[derive(Debug)]
pub struct RequestContext {
    /// Identifier used in logs and responses
    pub request_id: Uuid,
    /// Kind of the client's original request
    original: RequestKind,
    /// Whether the client's signal was a literal XML document
    xml: bool,
    depth: Cell<usize>,
}

impl RequestContext {
    pub fn new(request: &RequestData) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            original: request.request,
            xml: request.request == RequestKind::ReadXml
                || request.signal.trim_start().starts_with(XML_PREFIX),
            depth: Cell::new(0),
        }
    }

    /// Kind of the client's original request.
    pub fn original_request(&self) -> RequestKind {
        self.original
    }

    /// Whether the client's signal was a literal XML document.
    pub fn is_xml(&self) -> bool {
        self.xml
    }

    /// Current recursion depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

/// Recursion depth guard.
///
/// Entering increments the context's depth counter and dropping the guard decrements it again,
/// so the counter is restored however a level exits.
#[derive(Debug)]
pub struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    /// Enter a new level, failing if that would exceed `max_depth` levels.
    pub fn enter(context: &'a RequestContext, max_depth: usize) -> Result<Self, RangeError> {
        let depth = context.depth.get();
        if depth >= max_depth {
            return Err(RangeError { limit: max_depth });
        }
        context.depth.set(depth + 1);
        Ok(Self {
            depth: &context.depth,
        })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Move the data of `source` into the error of `block`.
///
/// `block` is unchanged on error.
fn substitute_error(
    block: &mut DataBlock,
    mut source: DataBlock,
    asymmetric: bool,
) -> Result<(), SubstitutionError> {
    if block.rank() != source.rank() || block.data_n() != source.data_n() {
        return Err(SubstitutionError::ErrorLengths {
            expected: block.data_n(),
            found: source.data_n(),
        });
    }
    let data = source.data.take();
    if asymmetric {
        block.errors.lo.replace(data);
        block.errors.asymmetric = true;
    } else {
        block.errors.hi.replace(data);
        block.errors.asymmetric = false;
    }
    Ok(())
}

/// Returns the index of the destination dimension of a substitution.
fn destination_dim(block: &DataBlock, to_dim: usize) -> Result<usize, SubstitutionError> {
    if to_dim >= block.rank() {
        return Err(SubstitutionError::DimensionOutOfRange {
            dimid: to_dim,
            rank: block.rank(),
        });
    }
    Ok(to_dim)
}

/// Replace a dimension of `block` with the data of `source`, or with one of its dimensions.
///
/// `block` is unchanged on error.
fn substitute_dim(
    block: &mut DataBlock,
    composite: &DimComposite,
    mut source: DataBlock,
) -> Result<(), SubstitutionError> {
    let Some(to_dim) = composite.to_dim else {
        return Ok(());
    };
    let to_dim = destination_dim(block, to_dim)?;
    let expected = block.dims[to_dim].dim_n;
    let dim = match composite.from_dim {
        None => {
            if source.data_n() != expected {
                return Err(SubstitutionError::DimensionLengths {
                    expected,
                    found: source.data_n(),
                });
            }
            Dim {
                dtype: source.dtype().unwrap_or(block.dims[to_dim].dtype),
                dim_n: source.data_n(),
                label: std::mem::take(&mut source.label),
                units: std::mem::take(&mut source.units),
                coords: DimCoords::Raw(source.data.take()),
                errors: std::mem::take(&mut source.errors),
                error_model: std::mem::take(&mut source.error_model),
            }
        }
        Some(from_dim) => {
            if from_dim >= source.rank() {
                return Err(SubstitutionError::DimensionOutOfRange {
                    dimid: from_dim,
                    rank: source.rank(),
                });
            }
            if source.dims[from_dim].dim_n != expected {
                return Err(SubstitutionError::DimensionLengths {
                    expected,
                    found: source.dims[from_dim].dim_n,
                });
            }
            source.dims.swap_remove(from_dim)
        }
    };
    block.dims[to_dim] = dim;
    Ok(())
}

/// Move the data of `source` into the error of a dimension of `block`.
///
/// `block` is unchanged on error.
fn substitute_dim_error(
    block: &mut DataBlock,
    composite: &DimComposite,
    mut source: DataBlock,
    asymmetric: bool,
) -> Result<(), SubstitutionError> {
    let Some(to_dim) = composite.to_dim else {
        return Ok(());
    };
    let to_dim = destination_dim(block, to_dim)?;
    let dim = &mut block.dims[to_dim];
    if source.data_n() != dim.dim_n {
        return Err(SubstitutionError::DimensionLengths {
            expected: dim.dim_n,
            found: source.data_n(),
        });
    }
    let data = source.data.take();
    if asymmetric {
        dim.errors.lo.replace(data);
        dim.errors.asymmetric = true;
    } else {
        dim.errors.hi.replace(data);
        dim.errors.asymmetric = false;
    }
    Ok(())
}

/// Returns `path/filename`, unless the path already names the file.
fn data_path(data_source: &DataSource) -> String {
    if data_source.filename.is_empty() || data_source.path.contains(&data_source.filename) {
        data_source.path.clone()
    } else {
        Path::new(&data_source.path)
            .join(&data_source.filename)
            .display()
            .to_string()
    }
}

/// Resolves signals to corrected data blocks
#[derive(Clone, Debug)]
pub struct SignalResolver {
    registry: Arc<PluginRegistry>,
    environment: Environment,
}

impl SignalResolver {
    pub fn new(registry: Arc<PluginRegistry>, environment: Environment) -> Self {
        Self {
            registry,
            environment,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn correction_options(&self) -> CorrectionOptions {
        CorrectionOptions::from(&self.environment)
    }

    /// Parse a signal and source address into a request.
    pub fn parse(&self, signal: &str, source: &str) -> Result<RequestData, ParseError> {
        AddressParser::new(&self.environment, &self.registry).parse(signal, source)
    }

    /// Parse a signal and source address and resolve it.
    pub fn resolve(
        &self,
        signal: &str,
        source: &str,
        client: &ClientBlock,
    ) -> Result<Resolved, ResolutionError> {
        let request = self.parse(signal, source)?;
        let context = RequestContext::new(&request);
        self.resolve_with_context(&request, client, &context)
    }

    /// Resolve a parsed request in a new span, recording the outcome.
    pub fn resolve_with_context(
        &self,
        request: &RequestData,
        client: &ClientBlock,
        context: &RequestContext,
    ) -> Result<Resolved, ResolutionError> {
        let span = span!(
            Level::INFO,
            "resolve",
            request_id = %context.request_id,
            signal = %request.signal,
            source = %request.source,
        );
        let _enter = span.enter();
        let result = self.resolve_request(request, client, context);
        let request_kind = context.original_request().to_string();
        match &result {
            Ok(resolved) => {
                event!(Level::DEBUG, data_n = resolved.block.data_n(), "resolved");
                record_resolution(&request_kind, "ok");
            }
            Err(error) => {
                event!(Level::DEBUG, %error, "resolution failed");
                record_resolution(&request_kind, "error");
            }
        }
        result
    }

    /// Apply correction actions to a block, after deselecting description actions overridden
    /// by instance actions.
    pub fn apply_actions(
        &self,
        block: &mut DataBlock,
        client: &ClientBlock,
        mut actions: Actions,
    ) -> Result<(), CorrectionError> {
        actions.deselect();
        corrections::apply_actions(block, client, &actions, &self.correction_options())
    }

    /// Resolve one level of a request.
    ///
    /// Errors at any level abort the whole resolution.
    pub fn resolve_request(
        &self,
        request: &RequestData,
        client: &ClientBlock,
        context: &RequestContext,
    ) -> Result<Resolved, ResolutionError> {
        let _guard = DepthGuard::enter(context, self.environment.max_depth)?;
        event!(
            Level::DEBUG,
            depth = context.depth(),
            request = %request.request,
            signal = %request.signal,
            "resolving"
        );

        let (block, metadata) = self.fetch(request, client)?;
        let mut block = match block {
            Some(mut block) => {
                if !request.datasubset.is_empty() {
                    let subset = SubsetAction {
                        subset: request.datasubset.clone(),
                        ..Default::default()
                    };
                    apply_subset(&mut block, &subset)?;
                }
                block
            }
            None => DataBlock::default(),
        };

        let kind = metadata.signal_desc.kind;
        let server_side = request.server_side.as_ref();
        if kind == SignalKind::Regular
            && server_side.is_none()
            && !matches!(
                request.request,
                RequestKind::ReadGeneric | RequestKind::ReadXml
            )
        {
            return Ok(Resolved { block, metadata });
        }

        let mut actions = Actions::parse(
            &metadata.signal_desc.xml,
            &metadata.signal.xml,
            request.exp_number,
            request.pass,
        )?;

        let composite = if kind == SignalKind::Composite {
            let composite = actions
                .composite()
                .cloned()
                .ok_or(ResolutionError::CompositeUndefined)?;
            let composite = self.complete_composite(composite, &metadata);
            block = self.resolve_composite(request, client, context, &composite)?;
            Some(composite)
        } else {
            if !metadata.has_xml() && server_side.is_none() {
                return Ok(Resolved { block, metadata });
            }
            None
        };

        if !client.get_asis {
            actions.deselect();
            corrections::apply_actions(&mut block, client, &actions, &self.correction_options())?;
        }

        match (&composite, server_side) {
            (Some(composite), _) => {
                for subset in &composite.subsets {
                    apply_subset(&mut block, subset)?;
                }
            }
            (None, Some(server_side)) => {
                for subset in &server_side.subsets {
                    apply_subset(&mut block, subset)?;
                }
            }
            (None, None) if kind == SignalKind::Switched => {
                for subset in actions.subsets() {
                    apply_subset(&mut block, subset)?;
                }
            }
            (None, None) => {}
        }
        Ok(Resolved { block, metadata })
    }

    /// Fetch the data and metadata of a request.
    ///
    /// Derived signals have no data of their own and return no block.
    fn fetch(
        &self,
        request: &RequestData,
        client: &ClientBlock,
    ) -> Result<(Option<DataBlock>, Metadata), ResolutionError> {
        if request.request == RequestKind::ReadXml
            || request.signal.trim_start().starts_with(XML_PREFIX)
        {
            let metadata = Metadata {
                signal_desc: SignalDesc {
                    kind: SignalKind::Composite,
                    xml: request.signal.clone(),
                    ..Default::default()
                },
                data_source: DataSource {
                    exp_number: request.exp_number,
                    pass: request.pass,
                    path: request.path.clone(),
                    filename: request.file.clone(),
                    format: request.format.clone(),
                    ..Default::default()
                },
                ..Default::default()
            };
            return Ok((None, metadata));
        }

        match request.request {
            RequestKind::ReadGeneric | RequestKind::ReadRemote => {
                let catalogue = self
                    .registry
                    .metadata()
                    .ok_or(PluginResolutionError::NoMetadataPlugin)?;
                let metadata = catalogue.lookup(request)?;
                let format = metadata.data_source.format.trim();
                if format.is_empty() {
                    return Ok((None, metadata));
                }
                let id = self
                    .registry
                    .find_by_format(format)
                    .ok_or_else(|| PluginResolutionError::UnknownFormat(format.to_string()))?;
                let data_request = RequestData {
                    request: RequestKind::Plugin(id),
                    format: format.to_string(),
                    path: data_path(&metadata.data_source),
                    file: metadata.data_source.filename.clone(),
                    ..request.clone()
                };
                match self.fetch_plugin(id, &data_request, client)? {
                    Fetched::Data { block, .. } => Ok((Some(block), metadata)),
                    Fetched::Derived { .. } => Ok((None, metadata)),
                }
            }
            RequestKind::Plugin(id) => match self.fetch_plugin(id, request, client)? {
                Fetched::Data { block, metadata } => Ok((Some(block), metadata)),
                Fetched::Derived { metadata } => Ok((None, metadata)),
            },
            RequestKind::ReadUnknown | RequestKind::ReadXml => {
                let name = if request.archive.is_empty() {
                    request.format.clone()
                } else {
                    request.archive.clone()
                };
                Err(PluginResolutionError::UnresolvedRequest(name).into())
            }
        }
    }

    fn fetch_plugin(
        &self,
        id: usize,
        request: &RequestData,
        client: &ClientBlock,
    ) -> Result<Fetched, ResolutionError> {
        let plugin = self
            .registry
            .get(id)
            .ok_or(PluginResolutionError::UnknownPluginId(id))?;
        event!(Level::DEBUG, format = plugin.format(), path = %request.path, "fetching");
        Ok(plugin.fetch(request, client, &self.environment)?)
    }

    /// Fill in the composite's file and format from the data source where they are absent.
    fn complete_composite(&self, mut composite: Composite, metadata: &Metadata) -> Composite {
        if composite.data_signal.is_empty() {
            composite.data_signal = composite.map_to_signal.clone();
        }
        let data_source = &metadata.data_source;
        if composite.file.is_empty() && !data_source.path.is_empty() {
            composite.file = data_path(data_source);
        }
        if composite.format.is_empty() && !data_source.format.is_empty() {
            composite.format = data_source.format.clone();
        }
        composite
    }

    /// Build the request for a component signal of a composite.
    ///
    /// The component is parsed against the client's source, so subsets and server-side
    /// subsetting in the component name apply to the component alone. Components without an
    /// archive prefix inherit the composite's archive.
    fn component_request(
        &self,
        base: &RequestData,
        signal: &str,
    ) -> Result<RequestData, ResolutionError> {
        let parser = AddressParser::new(&self.environment, &self.registry);
        let mut request = parser.parse(signal, &base.source)?;
        if !signal.contains(self.environment.delimiter.as_str()) && !base.archive.is_empty() {
            request.archive = base.archive.clone();
        }
        Ok(request)
    }

    /// Point a component request at an explicit file and format.
    fn with_format(
        &self,
        mut request: RequestData,
        file: &str,
        format: &str,
        unknown: impl FnOnce(String) -> PluginResolutionError,
    ) -> Result<RequestData, ResolutionError> {
        request.path = file.to_string();
        request.format = format.to_string();
        request.request = if GENERIC_FORMATS
            .iter()
            .any(|generic| generic.eq_ignore_ascii_case(format.trim()))
        {
            if request.exp_number <= 0 {
                return Err(unknown(format.to_string()).into());
            }
            RequestKind::ReadGeneric
        } else {
            RequestKind::Plugin(
                self.registry
                    .find_by_format(format)
                    .ok_or_else(|| unknown(format.to_string()))?,
            )
        };
        Ok(request)
    }

    /// Whether component signals must be read from an explicit file and format.
    fn needs_file(&self, request: &RequestData, context: &RequestContext) -> bool {
        context.is_xml() || request.request == RequestKind::ReadXml || request.exp_number <= 0
    }

    /// Request for a component that carries the composite's file and format when needed.
    fn data_component(
        &self,
        request: &RequestData,
        context: &RequestContext,
        composite: &Composite,
        signal: &str,
    ) -> Result<RequestData, ResolutionError> {
        let component = self.component_request(request, signal)?;
        if !self.needs_file(request, context) {
            return Ok(component);
        }
        if (composite.file.is_empty() || composite.format.is_empty()) && request.exp_number <= 0 {
            return Err(ResolutionError::CompositeIncomplete);
        }
        self.with_format(
            component,
            &composite.file,
            &composite.format,
            PluginResolutionError::UnknownFormat,
        )
    }

    /// Assemble the data block of a composite signal from its components.
    fn resolve_composite(
        &self,
        request: &RequestData,
        client: &ClientBlock,
        context: &RequestContext,
        composite: &Composite,
    ) -> Result<DataBlock, ResolutionError> {
        if composite.data_signal.is_empty() {
            return Err(ResolutionError::CompositeUndefined);
        }
        event!(Level::DEBUG, data = %composite.data_signal, "resolving composite data");
        let data_request = self.data_component(request, context, composite, &composite.data_signal)?;
        let mut block = self.resolve_request(&data_request, client, context)?.block;
        if let Some(order) = composite.order {
            block.order = Some(order);
        }

        for (signal, asymmetric) in [
            (&composite.error_signal, false),
            (&composite.aserror_signal, true),
        ] {
            if signal.is_empty() {
                continue;
            }
            event!(Level::DEBUG, %signal, asymmetric, "substituting error data");
            let error_request = self.data_component(request, context, composite, signal)?;
            let source = self.resolve_request(&error_request, client, context)?.block;
            substitute_error(&mut block, source, asymmetric)?;
        }

        for dimension in &composite.dimensions {
            if !dimension.dim_signal.is_empty() {
                event!(Level::DEBUG, signal = %dimension.dim_signal, "substituting dimension");
                let dim_request = self.dimension_request(request, composite, dimension)?;
                let source = self.resolve_request(&dim_request, client, context)?.block;
                substitute_dim(&mut block, dimension, source)?;
            }
            for (signal, asymmetric) in [
                (&dimension.dim_error, false),
                (&dimension.dim_aserror, true),
            ] {
                if signal.is_empty() {
                    continue;
                }
                event!(Level::DEBUG, %signal, asymmetric, "substituting dimension error");
                let error_request = self.data_component(request, context, composite, signal)?;
                let source = self.resolve_request(&error_request, client, context)?.block;
                substitute_dim_error(&mut block, dimension, source, asymmetric)?;
            }
        }
        Ok(block)
    }

    /// Request for a dimension signal.
    ///
    /// The file and format are taken from, in increasing priority, the client request, the
    /// composite and the dimension. Without any the signal is looked up in the catalogue.
    fn dimension_request(
        &self,
        request: &RequestData,
        composite: &Composite,
        dimension: &DimComposite,
    ) -> Result<RequestData, ResolutionError> {
        let component = self.component_request(request, &dimension.dim_signal)?;
        let pick = |candidates: [&str; 3]| {
            candidates
                .into_iter()
                .rev()
                .find(|candidate| !candidate.is_empty())
                .unwrap_or_default()
                .to_string()
        };
        let file = pick([
            request.path.as_str(),
            composite.file.as_str(),
            dimension.file.as_str(),
        ]);
        let format = pick([
            request.format.as_str(),
            composite.format.as_str(),
            dimension.format.as_str(),
        ]);
        self.with_format(
            component,
            &file,
            &format,
            PluginResolutionError::UnknownDimensionFormat,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::test_utils;
    use crate::types::{Buffer, Compression, DType, Values};

    fn resolver() -> SignalResolver {
        SignalResolver::new(
            Arc::new(test_utils::get_test_registry()),
            Environment::default(),
        )
    }

    fn values(block: &DataBlock) -> Option<&Values> {
        block.data.values()
    }

    #[test]
    fn depth_guard_restores_counter() {
        let context = RequestContext::new(&RequestData::default());
        {
            let _outer = DepthGuard::enter(&context, 2).unwrap();
            assert_eq!(1, context.depth());
            {
                let _inner = DepthGuard::enter(&context, 2).unwrap();
                assert_eq!(2, context.depth());
                assert_eq!(
                    RangeError { limit: 2 },
                    DepthGuard::enter(&context, 2).unwrap_err()
                );
                assert_eq!(2, context.depth());
            }
            assert_eq!(1, context.depth());
        }
        assert_eq!(0, context.depth());
    }

    #[test]
    fn context_flags() {
        let request = RequestData {
            request: RequestKind::ReadXml,
            signal: "<?xml version=\"1.0\"?><action/>".to_string(),
            ..Default::default()
        };
        let context = RequestContext::new(&request);
        assert!(context.is_xml());
        assert_eq!(RequestKind::ReadXml, context.original_request());
        assert_ne!(
            context.request_id,
            RequestContext::new(&request).request_id
        );
    }

    #[test]
    fn error_substitution_length_check() {
        let mut block = DataBlock::new(Values::Float64(vec![1.0, 2.0]));
        block.errors.hi = Buffer::new(Values::Float64(vec![0.5, 0.5]));
        let source = DataBlock::new(Values::Float64(vec![0.1, 0.2, 0.3]));
        assert_eq!(
            SubstitutionError::ErrorLengths {
                expected: 2,
                found: 3
            },
            substitute_error(&mut block, source, false).unwrap_err()
        );
        assert_eq!(Buffer::new(Values::Float64(vec![0.5, 0.5])), block.errors.hi);
    }

    #[test]
    fn error_substitution_moves_data() {
        let mut block = DataBlock::new(Values::Float64(vec![1.0, 2.0]));
        let source = DataBlock::new(Values::Float32(vec![0.1, 0.2]));
        substitute_error(&mut block, source, true).unwrap();
        assert_eq!(Buffer::new(Values::Float32(vec![0.1, 0.2])), block.errors.lo);
        assert!(block.errors.asymmetric);
    }

    #[test]
    fn dimension_substitution_from_data() {
        let mut block = DataBlock::new(Values::Int32(vec![1, 2, 3]))
            .with_dims(vec![Dim::regular(DType::Float64, 3, 0.0, 1.0)]);
        let mut source = DataBlock::new(Values::Float32(vec![0.0, 0.5, 1.0]));
        source.label = "time".to_string();
        source.units = "s".to_string();
        let composite = DimComposite {
            to_dim: Some(0),
            ..Default::default()
        };
        substitute_dim(&mut block, &composite, source).unwrap();
        let dim = &block.dims[0];
        assert!(!dim.is_compressed());
        assert_eq!(DType::Float32, dim.dtype);
        assert_eq!("time", dim.label);
        assert_eq!("s", dim.units);
        assert_eq!(vec![0.0, 0.5, 1.0], dim.coordinates());
    }

    #[test]
    fn dimension_substitution_from_dim() {
        let mut block = DataBlock::new(Values::Int32(vec![1, 2]))
            .with_dims(vec![Dim::raw(Values::Int8(vec![0, 1]))]);
        let source = DataBlock::new(Values::Int32(vec![0; 4])).with_dims(vec![
            Dim::regular(DType::Float64, 2, 0.0, 1.0),
            Dim::regular(DType::Float64, 2, 5.0, 0.5),
        ]);
        let composite = DimComposite {
            to_dim: Some(0),
            from_dim: Some(1),
            ..Default::default()
        };
        substitute_dim(&mut block, &composite, source).unwrap();
        assert_eq!(
            Some(&Compression::Regular {
                start: 5.0,
                step: 0.5
            }),
            block.dims[0].compression()
        );
    }

    #[test]
    fn dimension_substitution_leaves_destination_on_error() {
        let mut block = DataBlock::new(Values::Int32(vec![1, 2]))
            .with_dims(vec![Dim::raw(Values::Int8(vec![0, 1]))]);
        let composite = DimComposite {
            to_dim: Some(0),
            ..Default::default()
        };
        let source = DataBlock::new(Values::Int8(vec![7, 8, 9]));
        assert_eq!(
            SubstitutionError::DimensionLengths {
                expected: 2,
                found: 3
            },
            substitute_dim(&mut block, &composite, source).unwrap_err()
        );
        assert_eq!(vec![0.0, 1.0], block.dims[0].coordinates());

        let composite = DimComposite {
            to_dim: Some(3),
            ..Default::default()
        };
        let source = DataBlock::new(Values::Int8(vec![7, 8]));
        assert!(matches!(
            substitute_dim(&mut block, &composite, source),
            Err(SubstitutionError::DimensionOutOfRange { dimid: 3, rank: 1 })
        ));
    }

    #[test]
    fn dimension_error_substitution() {
        let mut block = DataBlock::new(Values::Int32(vec![1, 2]))
            .with_dims(vec![Dim::raw(Values::Float64(vec![0.0, 1.0]))]);
        let composite = DimComposite {
            to_dim: Some(0),
            ..Default::default()
        };
        let source = DataBlock::new(Values::Float64(vec![0.01, 0.02]));
        substitute_dim_error(&mut block, &composite, source, false).unwrap();
        assert_eq!(
            Buffer::new(Values::Float64(vec![0.01, 0.02])),
            block.dims[0].errors.hi
        );
    }

    #[test]
    fn resolve_generic_short_circuit() {
        let resolved = resolver()
            .resolve("efm::ipla", "12345", &ClientBlock::default())
            .unwrap();
        assert_eq!(
            Some(&Values::Float32(vec![0.0, 1.5e5, 3.0e5, 4.5e5])),
            values(&resolved.block)
        );
        assert_eq!("ipla", resolved.metadata.signal_desc.signal_name);
    }

    #[test]
    fn resolve_with_corrections() {
        let resolved = resolver()
            .resolve("efm::ip_ka", "12345", &ClientBlock::default())
            .unwrap();
        assert_eq!(
            Some(&Values::Float32(vec![0.0, 150.0, 300.0, 450.0])),
            values(&resolved.block)
        );
        assert_eq!("kA", resolved.block.units);
        assert_eq!("Plasma Current", resolved.block.label);

        // Description actions are out of range for this experiment.
        let resolved = resolver()
            .resolve("efm::ip_ka", "100", &ClientBlock::default())
            .unwrap();
        assert_eq!(
            Some(&Values::Float32(vec![0.0, 1.5e5, 3.0e5, 4.5e5])),
            values(&resolved.block)
        );

        let client = ClientBlock {
            get_asis: true,
            ..Default::default()
        };
        let resolved = resolver().resolve("efm::ip_ka", "12345", &client).unwrap();
        assert_eq!("", resolved.block.units);
    }

    #[test]
    fn resolve_composite() {
        let resolved = resolver()
            .resolve("ip_composite", "12345", &ClientBlock::default())
            .unwrap();
        let block = resolved.block;
        assert_eq!(
            Some(&Values::Float32(vec![0.0, 1.5e5, 3.0e5, 4.5e5])),
            values(&block)
        );
        assert_eq!(
            Buffer::new(Values::Float32(vec![10.0, 10.0, 10.0, 10.0])),
            block.errors.hi
        );
        assert_eq!(Some(0), block.order);
        assert_eq!("Composite Current", block.label);
        assert_eq!(SignalKind::Composite, resolved.metadata.signal_desc.kind);
    }

    #[test]
    fn resolve_composite_undefined() {
        let result = resolver().resolve("undefined_composite", "12345", &ClientBlock::default());
        assert!(matches!(result, Err(ResolutionError::CompositeUndefined)));
    }

    #[test]
    fn resolve_recursion_limit() {
        let result = resolver().resolve("loop", "12345", &ClientBlock::default());
        assert!(matches!(result, Err(ResolutionError::Range(_))));
    }

    #[test]
    fn resolve_subset_in_signal() {
        let resolved = resolver()
            .resolve("efm::ipla[1:3]", "12345", &ClientBlock::default())
            .unwrap();
        assert_eq!(
            Some(&Values::Float32(vec![1.5e5, 3.0e5])),
            values(&resolved.block)
        );
        assert_eq!(vec![2], resolved.block.shape());
    }

    #[test]
    fn resolve_server_side() {
        let resolved = resolver()
            .resolve(
                "ss::subset(\"efm::ipla\", [#], function=abs())",
                "12345",
                &ClientBlock::default(),
            )
            .unwrap();
        assert_eq!(Some(&Values::Float32(vec![4.5e5])), values(&resolved.block));
    }

    #[test]
    fn resolve_xml_composite_needs_file() {
        let xml = r#"<?xml version="1.0"?><action><signal><composite data="ipla"/></signal></action>"#;
        let result = resolver().resolve(xml, "", &ClientBlock::default());
        assert!(matches!(result, Err(ResolutionError::CompositeIncomplete)));
    }

    #[test]
    fn resolve_unknown_signal() {
        let result = resolver().resolve("efm::nothing", "12345", &ClientBlock::default());
        assert!(matches!(
            result,
            Err(ResolutionError::Plugin(PluginError::NotFound { .. }))
        ));
    }

    #[test]
    fn resolve_unknown_plugin() {
        let result = resolver().resolve("nosuch::read(x=1)", "", &ClientBlock::default());
        assert!(matches!(
            result,
            Err(ResolutionError::PluginResolution(
                PluginResolutionError::UnresolvedRequest(_)
            ))
        ));
    }

    #[test]
    fn resolve_without_catalogue() {
        let resolver = SignalResolver::new(Arc::new(PluginRegistry::new()), Environment::default());
        let result = resolver.resolve("ip", "12345", &ClientBlock::default());
        assert!(matches!(
            result,
            Err(ResolutionError::PluginResolution(
                PluginResolutionError::NoMetadataPlugin
            ))
        ));
    }

    #[test]
    fn apply_actions_deselects() {
        let actions = Actions::parse(
            r#"<action><signal><calibration target="data"><factor>2</factor></calibration></signal></action>"#,
            r#"<action><signal><calibration target="data"><factor>3</factor></calibration></signal></action>"#,
            1,
            -1,
        )
        .unwrap();
        let mut block = DataBlock::new(Values::Float64(vec![1.0]));
        resolver()
            .apply_actions(&mut block, &ClientBlock::default(), actions)
            .unwrap();
        assert_eq!(Some(&Values::Float64(vec![3.0])), values(&block));
    }
}

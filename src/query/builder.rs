//! nfdump argument assembly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::symbols::{Aggregator, Filter, Unit, Variable};
use crate::error::Result;
use crate::process::CommandSpec;

/// Field separator used in `-o fmt:` output.
pub const FIELD_DELIMITER: char = '|';

/// A declarative query: what to print, how to aggregate and filter.
///
/// The builder only ever borrows a spec, so one spec can be reused for any
/// number of slices without values leaking between queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    /// Output fields; empty selects every known variable
    pub variables: Vec<Variable>,
    /// Aggregation keys; empty disables aggregation
    pub aggregators: Vec<Aggregator>,
    /// Sort unit; `None` uses [`Unit::default`]
    pub unit: Option<Unit>,
    /// Filter values; `None` or blank values are left out of the predicate
    pub filters: BTreeMap<Filter, Option<String>>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every symbolic name, failing on the first unknown one.
    pub fn parse<S: AsRef<str>>(
        variables: &[S],
        aggregators: &[S],
        unit: Option<&str>,
        filters: &[(S, Option<S>)],
    ) -> Result<Self> {
        let variables = variables
            .iter()
            .map(|v| v.as_ref().parse())
            .collect::<Result<Vec<Variable>>>()?;
        let aggregators = aggregators
            .iter()
            .map(|a| a.as_ref().parse())
            .collect::<Result<Vec<Aggregator>>>()?;
        let unit = unit.map(str::parse::<Unit>).transpose()?;

        let mut parsed = BTreeMap::new();
        for (name, value) in filters {
            let filter: Filter = name.as_ref().parse()?;
            let value = value.as_ref().map(|v| v.as_ref().to_string());
            parsed.insert(filter, value);
        }

        Ok(Self {
            variables,
            aggregators,
            unit,
            filters: parsed,
        })
    }

    pub fn with_variables(mut self, variables: impl IntoIterator<Item = Variable>) -> Self {
        self.variables = variables.into_iter().collect();
        self
    }

    pub fn with_aggregators(mut self, aggregators: impl IntoIterator<Item = Aggregator>) -> Self {
        self.aggregators = aggregators.into_iter().collect();
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_filter(mut self, filter: Filter, value: impl Into<String>) -> Self {
        self.filters.insert(filter, Some(value.into()));
        self
    }

    /// Variables actually printed, after empty-means-all substitution.
    pub fn effective_variables(&self) -> Vec<Variable> {
        if self.variables.is_empty() {
            Variable::ALL.to_vec()
        } else {
            self.variables.clone()
        }
    }

    /// `fmt:<tok>|<tok>|...`
    pub fn output_format(&self) -> String {
        let tokens: Vec<&str> = self
            .effective_variables()
            .into_iter()
            .map(Variable::token)
            .collect();
        format!("fmt:{}", tokens.join(&FIELD_DELIMITER.to_string()))
    }

    /// `proto,srcip,...`, or `None` without aggregators.
    pub fn aggregation(&self) -> Option<String> {
        if self.aggregators.is_empty() {
            return None;
        }
        let tokens: Vec<&str> = self.aggregators.iter().map(|a| a.token()).collect();
        Some(tokens.join(","))
    }

    pub fn unit(&self) -> Unit {
        self.unit.unwrap_or_default()
    }

    /// Filter predicate in table order, or `None` when no filter has a value.
    pub fn filter_expression(&self) -> Option<String> {
        let clauses: Vec<String> = self
            .filters
            .iter()
            .filter_map(|(filter, value)| match value.as_deref() {
                Some(v) if !v.trim().is_empty() => Some(filter.clause(v)),
                _ => None,
            })
            .collect();

        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" and "))
        }
    }
}

/// Whether a flow store is a single file or a directory of rotated files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Directory,
}

impl StoreKind {
    /// `None` when the path is neither (missing, socket, ...).
    pub fn detect(path: &Path) -> Option<Self> {
        if path.is_file() {
            Some(StoreKind::File)
        } else if path.is_dir() {
            Some(StoreKind::Directory)
        } else {
            None
        }
    }

    /// nfdump input selector.
    pub fn flag(self) -> &'static str {
        match self {
            StoreKind::File => "-r",
            StoreKind::Directory => "-R",
        }
    }
}

/// Builds nfdump invocations against one flow store.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    engine: String,
    store: PathBuf,
}

impl QueryBuilder {
    pub fn new(engine: impl Into<String>, store: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            store: store.into(),
        }
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    fn input(&self) -> Option<[String; 2]> {
        let kind = StoreKind::detect(&self.store)?;
        Some([
            kind.flag().to_string(),
            self.store.to_string_lossy().into_owned(),
        ])
    }

    /// Full argument list (program first) for one time range.
    ///
    /// Empty when the store is neither a file nor a directory.
    pub fn build(&self, spec: &QuerySpec, time_range: &str) -> Vec<String> {
        let Some(input) = self.input() else {
            return Vec::new();
        };

        let mut args = vec![self.engine.clone()];
        args.extend(input);
        args.push("-q".to_string());
        args.push("-t".to_string());
        args.push(time_range.to_string());

        args.push("-o".to_string());
        args.push(spec.output_format());

        if let Some(aggregation) = spec.aggregation() {
            args.push("-A".to_string());
            args.push(aggregation);
        }

        args.push("-O".to_string());
        args.push(spec.unit().token().to_string());

        if let Some(filter) = spec.filter_expression() {
            args.push(filter);
        }

        args
    }

    /// Cheap aggregate query whose footer carries the summary and time window.
    pub fn summary_args(&self, time_range: Option<&str>) -> Vec<String> {
        let Some(input) = self.input() else {
            return Vec::new();
        };

        let mut args = vec![
            self.engine.clone(),
            "-A".to_string(),
            "proto".to_string(),
            "-n".to_string(),
            "1".to_string(),
        ];
        args.extend(input);
        if let Some(range) = time_range {
            args.push("-t".to_string());
            args.push(range.to_string());
        }
        args
    }

    /// [`QueryBuilder::build`] as a runnable command.
    pub fn command(&self, spec: &QuerySpec, time_range: &str) -> Option<CommandSpec> {
        CommandSpec::from_argv(self.build(spec, time_range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: &str = "2024/01/01.00:00:00-2024/01/01.00:01:00";

    fn file_store() -> (tempfile::TempDir, QueryBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows");
        std::fs::write(&path, b"").unwrap();
        let builder = QueryBuilder::new("nfdump", &path);
        (dir, builder)
    }

    #[test]
    fn test_argument_order() {
        let (_dir, builder) = file_store();
        let spec = QuerySpec::new()
            .with_variables([Variable::FirstSeen, Variable::Duration])
            .with_aggregators([Aggregator::Protocol, Aggregator::SourceAddress])
            .with_unit(Unit::Bytes)
            .with_filter(Filter::Protocol, "tcp");

        let args = builder.build(&spec, RANGE);
        let store = builder.store().to_string_lossy().into_owned();
        assert_eq!(
            args,
            vec![
                "nfdump", "-r", store.as_str(), "-q", "-t", RANGE, "-o", "fmt:%ts|%td", "-A",
                "proto,srcip", "-O", "bytes", "proto tcp",
            ]
        );
    }

    #[test]
    fn test_empty_variables_select_all() {
        let spec = QuerySpec::new();
        let format = spec.output_format();
        assert!(format.starts_with("fmt:%ts|%tr|%td|%pr"));
        assert!(format.ends_with("%stos|%dtos"));
        assert_eq!(format.matches('|').count(), Variable::ALL.len() - 1);
    }

    #[test]
    fn test_defaults_without_aggregators_or_filters() {
        let (_dir, builder) = file_store();
        let args = builder.build(&QuerySpec::new(), RANGE);
        assert!(!args.contains(&"-A".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-O", "packets"]);
    }

    #[test]
    fn test_filters_skip_missing_values() {
        let mut spec = QuerySpec::new();
        spec.filters.insert(Filter::Protocol, Some("udp".into()));
        spec.filters.insert(Filter::SourceAddress, None);
        spec.filters.insert(Filter::DestinationPort, Some("53".into()));
        spec.filters.insert(Filter::Bytes, Some("   ".into()));

        assert_eq!(
            spec.filter_expression().as_deref(),
            Some("proto udp and dst port 53")
        );
    }

    #[test]
    fn test_no_filter_values_no_predicate() {
        let mut spec = QuerySpec::new();
        spec.filters.insert(Filter::Protocol, None);
        assert_eq!(spec.filter_expression(), None);
    }

    #[test]
    fn test_build_is_repeatable() {
        let (_dir, builder) = file_store();
        let spec = QuerySpec::new().with_filter(Filter::SourcePort, "22");
        let first = builder.build(&spec, RANGE);
        let second = builder.build(&spec, RANGE);
        assert_eq!(first, second);

        let unfiltered = builder.build(&QuerySpec::new(), RANGE);
        assert!(!unfiltered.iter().any(|a| a.contains("src port")));
    }

    #[test]
    fn test_directory_store_uses_recursive_flag() {
        let dir = tempfile::tempdir().unwrap();
        let builder = QueryBuilder::new("nfdump", dir.path());
        let args = builder.build(&QuerySpec::new(), RANGE);
        assert_eq!(args[1], "-R");
    }

    #[test]
    fn test_missing_store_builds_nothing() {
        let builder = QueryBuilder::new("nfdump", "/nonexistent/flowslice/store");
        assert!(builder.build(&QuerySpec::new(), RANGE).is_empty());
        assert!(builder.summary_args(None).is_empty());
        assert!(builder.command(&QuerySpec::new(), RANGE).is_none());
    }

    #[test]
    fn test_summary_args() {
        let (_dir, builder) = file_store();
        let store = builder.store().to_string_lossy().into_owned();
        assert_eq!(
            builder.summary_args(None),
            vec!["nfdump", "-A", "proto", "-n", "1", "-r", store.as_str()]
        );
        let ranged = builder.summary_args(Some(RANGE));
        assert_eq!(&ranged[ranged.len() - 2..], ["-t", RANGE]);
    }

    #[test]
    fn test_parse_symbols() {
        let spec = QuerySpec::parse(
            &["PROTOCOL", "bytes"],
            &["source port"],
            Some("FLOWS"),
            &[("DESTINATION ADDRESS", Some("10.0.0.1")), ("TCP FLAGS", None)],
        )
        .unwrap();
        assert_eq!(spec.variables, vec![Variable::Protocol, Variable::Bytes]);
        assert_eq!(spec.aggregation().as_deref(), Some("srcport"));
        assert_eq!(spec.unit(), Unit::Flows);
        assert_eq!(spec.filter_expression().as_deref(), Some("dst ip 10.0.0.1"));

        let err = QuerySpec::parse::<&str>(&[], &[], Some("LITRES"), &[]).unwrap_err();
        assert!(err.to_string().contains("LITRES"));
    }
}

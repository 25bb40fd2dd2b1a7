//! Human-readable names and their nfdump tokens.
//!
//! Each table is an enum whose declaration order is the canonical order used
//! when a whole table is substituted or iterated.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Normalize user input: `source-address`, `Source_Address` and
/// `SOURCE ADDRESS` all name the same symbol.
fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '_' | '-' => ' ',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn lookup<T: Copy>(
    table: &[T],
    name: fn(T) -> &'static str,
    kind: &'static str,
    s: &str,
) -> Result<T> {
    let wanted = normalize(s);
    table
        .iter()
        .copied()
        .find(|item| name(*item) == wanted)
        .ok_or_else(|| Error::UnknownSymbol {
            kind,
            symbol: s.to_string(),
        })
}

/// Output fields selectable with `-o fmt:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    FirstSeen,
    LastSeen,
    Duration,
    Protocol,
    SourceAddress,
    DestinationAddress,
    SourcePort,
    DestinationPort,
    Packets,
    Bytes,
    Flows,
    TcpFlags,
    SourceTos,
    DestinationTos,
}

impl Variable {
    pub const ALL: [Variable; 14] = [
        Variable::FirstSeen,
        Variable::LastSeen,
        Variable::Duration,
        Variable::Protocol,
        Variable::SourceAddress,
        Variable::DestinationAddress,
        Variable::SourcePort,
        Variable::DestinationPort,
        Variable::Packets,
        Variable::Bytes,
        Variable::Flows,
        Variable::TcpFlags,
        Variable::SourceTos,
        Variable::DestinationTos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::FirstSeen => "FIRST SEEN",
            Variable::LastSeen => "LAST SEEN",
            Variable::Duration => "DURATION",
            Variable::Protocol => "PROTOCOL",
            Variable::SourceAddress => "SOURCE ADDRESS",
            Variable::DestinationAddress => "DESTINATION ADDRESS",
            Variable::SourcePort => "SOURCE PORT",
            Variable::DestinationPort => "DESTINATION PORT",
            Variable::Packets => "PACKETS",
            Variable::Bytes => "BYTES",
            Variable::Flows => "FLOWS",
            Variable::TcpFlags => "TCP FLAGS",
            Variable::SourceTos => "SOURCE TOS",
            Variable::DestinationTos => "DESTINATION TOS",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Variable::FirstSeen => "%ts",
            Variable::LastSeen => "%tr",
            Variable::Duration => "%td",
            Variable::Protocol => "%pr",
            Variable::SourceAddress => "%sa",
            Variable::DestinationAddress => "%da",
            Variable::SourcePort => "%sp",
            Variable::DestinationPort => "%dp",
            Variable::Packets => "%pkt",
            Variable::Bytes => "%byt",
            Variable::Flows => "%fl",
            Variable::TcpFlags => "%flg",
            Variable::SourceTos => "%stos",
            Variable::DestinationTos => "%dtos",
        }
    }
}

/// Aggregation keys for `-A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Aggregator {
    Protocol,
    SourceAddress,
    DestinationAddress,
    SourcePort,
    DestinationPort,
}

impl Aggregator {
    pub const ALL: [Aggregator; 5] = [
        Aggregator::Protocol,
        Aggregator::SourceAddress,
        Aggregator::DestinationAddress,
        Aggregator::SourcePort,
        Aggregator::DestinationPort,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Aggregator::Protocol => "PROTOCOL",
            Aggregator::SourceAddress => "SOURCE ADDRESS",
            Aggregator::DestinationAddress => "DESTINATION ADDRESS",
            Aggregator::SourcePort => "SOURCE PORT",
            Aggregator::DestinationPort => "DESTINATION PORT",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Aggregator::Protocol => "proto",
            Aggregator::SourceAddress => "srcip",
            Aggregator::DestinationAddress => "dstip",
            Aggregator::SourcePort => "srcport",
            Aggregator::DestinationPort => "dstport",
        }
    }
}

/// Sort order for `-O`, also the volume selector for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Unit {
    #[default]
    Packets,
    Bytes,
    Flows,
}

impl Unit {
    pub const ALL: [Unit; 3] = [Unit::Packets, Unit::Bytes, Unit::Flows];

    pub fn name(self) -> &'static str {
        match self {
            Unit::Packets => "PACKETS",
            Unit::Bytes => "BYTES",
            Unit::Flows => "FLOWS",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Unit::Packets => "packets",
            Unit::Bytes => "bytes",
            Unit::Flows => "flows",
        }
    }
}

/// Filter predicates; the value is supplied per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Filter {
    Protocol,
    IpVersion,
    SourceAddress,
    DestinationAddress,
    SourcePort,
    DestinationPort,
    TcpFlags,
    Packets,
    Bytes,
    Flows,
    Duration,
}

impl Filter {
    pub const ALL: [Filter; 11] = [
        Filter::Protocol,
        Filter::IpVersion,
        Filter::SourceAddress,
        Filter::DestinationAddress,
        Filter::SourcePort,
        Filter::DestinationPort,
        Filter::TcpFlags,
        Filter::Packets,
        Filter::Bytes,
        Filter::Flows,
        Filter::Duration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Filter::Protocol => "PROTOCOL",
            Filter::IpVersion => "IP VERSION",
            Filter::SourceAddress => "SOURCE ADDRESS",
            Filter::DestinationAddress => "DESTINATION ADDRESS",
            Filter::SourcePort => "SOURCE PORT",
            Filter::DestinationPort => "DESTINATION PORT",
            Filter::TcpFlags => "TCP FLAGS",
            Filter::Packets => "PACKETS",
            Filter::Bytes => "BYTES",
            Filter::Flows => "FLOWS",
            Filter::Duration => "DURATION",
        }
    }

    /// Keyword preceding the value; empty for IP VERSION, whose value
    /// (`inet`, `inet6`) is itself the predicate.
    pub fn token(self) -> &'static str {
        match self {
            Filter::Protocol => "proto",
            Filter::IpVersion => "",
            Filter::SourceAddress => "src ip",
            Filter::DestinationAddress => "dst ip",
            Filter::SourcePort => "src port",
            Filter::DestinationPort => "dst port",
            Filter::TcpFlags => "flags",
            Filter::Packets => "packets",
            Filter::Bytes => "bytes",
            Filter::Flows => "flows",
            Filter::Duration => "duration",
        }
    }

    /// `"<token> <value>"`.
    pub fn clause(self, value: &str) -> String {
        let value = value.trim();
        if self.token().is_empty() {
            value.to_string()
        } else {
            format!("{} {}", self.token(), value)
        }
    }
}

macro_rules! symbol_traits {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                lookup(&<$ty>::ALL, <$ty>::name, $kind, s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

symbol_traits!(Variable, "variable");
symbol_traits!(Aggregator, "aggregator");
symbol_traits!(Unit, "unit");
symbol_traits!(Filter, "filter");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_forgiving_about_case_and_separators() {
        assert_eq!("SOURCE ADDRESS".parse::<Variable>().unwrap(), Variable::SourceAddress);
        assert_eq!("source-address".parse::<Variable>().unwrap(), Variable::SourceAddress);
        assert_eq!(" tcp_flags ".parse::<Variable>().unwrap(), Variable::TcpFlags);
        assert_eq!("bytes".parse::<Unit>().unwrap(), Unit::Bytes);
    }

    #[test]
    fn test_unknown_unit_names_value() {
        match "FURLONGS".parse::<Unit>() {
            Err(Error::UnknownSymbol { kind, symbol }) => {
                assert_eq!(kind, "unit");
                assert_eq!(symbol, "FURLONGS");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_aggregator_rejects_variable_only_names() {
        assert!("FIRST SEEN".parse::<Aggregator>().is_err());
        assert_eq!("destination port".parse::<Aggregator>().unwrap().token(), "dstport");
    }

    #[test]
    fn test_tokens_match_nfdump() {
        assert_eq!(Variable::FirstSeen.token(), "%ts");
        assert_eq!(Variable::TcpFlags.token(), "%flg");
        assert_eq!(Unit::default().token(), "packets");
        assert_eq!(Filter::DestinationPort.clause("443"), "dst port 443");
        assert_eq!(Filter::IpVersion.clause("inet6"), "inet6");
    }

    #[test]
    fn test_units_are_lowercased_names() {
        for unit in Unit::ALL {
            assert_eq!(unit.token(), unit.name().to_lowercase());
        }
    }
}

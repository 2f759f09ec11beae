//! Scenario expansion for parameterized tests
//!
//! A scenario is a named bundle of parameters. Test definitions declare
//! scenario lists; the runner multiplies them into a Cartesian product and
//! runs one test instance per product element. When the product is too
//! large, [`prune`] selects a deterministic weighted subset so two runs
//! with the same seed exercise the same instances.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use xxhash_rust::xxh3::xxh3_64;

use wiredtest_core::{Error, Result};

/// One scenario parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// String parameter, e.g. a key format
    Str(String),
    /// Integer parameter, e.g. a row count
    Int(i64),
    /// Boolean parameter, e.g. a feature toggle
    Bool(bool),
}

impl ParamValue {
    /// The string payload, if this is a string parameter.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer parameter.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean parameter.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// A parameter bundle expanding one test into many instances
///
/// Two scenarios with the same identifier carry identical parameter
/// associations; [`multiply`] rejects products that would violate this.
#[derive(Debug, Clone)]
pub struct Scenario {
    id: String,
    params: BTreeMap<String, ParamValue>,
    weight: f64,
}

impl Scenario {
    /// The empty scenario of an unparameterized test.
    pub fn empty() -> Scenario {
        Scenario {
            id: String::new(),
            params: BTreeMap::new(),
            weight: 1.0,
        }
    }

    /// The scenario identifier, dotted when composed by [`multiply`].
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Selection weight used by [`prune`]; defaults to 1.0.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Look up a parameter.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// A required string parameter.
    ///
    /// # Errors
    /// `InvalidArgument` when absent or not a string.
    pub fn str_param(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "scenario {:?} has no string parameter {}",
                    self.id, name
                ))
            })
    }

    /// A required integer parameter.
    ///
    /// # Errors
    /// `InvalidArgument` when absent or not an integer.
    pub fn i64_param(&self, name: &str) -> Result<i64> {
        self.get(name)
            .and_then(ParamValue::as_i64)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "scenario {:?} has no integer parameter {}",
                    self.id, name
                ))
            })
    }

    /// A boolean parameter, `default` when absent.
    pub fn bool_param(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(default)
    }

    /// Iterate parameters in name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One single-parameter scenario per `(identifier, value)` pair.
pub fn quick(name: &str, values: &[(&str, ParamValue)]) -> Vec<Scenario> {
    values
        .iter()
        .map(|(id, value)| Scenario {
            id: id.to_string(),
            params: BTreeMap::from([(name.to_string(), value.clone())]),
            weight: 1.0,
        })
        .collect()
}

/// [`quick`] with an explicit pruning weight per pair.
pub fn quick_weighted(name: &str, values: &[(&str, ParamValue, f64)]) -> Vec<Scenario> {
    values
        .iter()
        .map(|(id, value, weight)| Scenario {
            id: id.to_string(),
            params: BTreeMap::from([(name.to_string(), value.clone())]),
            weight: *weight,
        })
        .collect()
}

/// Cartesian product of scenario lists.
///
/// Product identifiers are the part identifiers joined by `sep`; parameters
/// are the disjoint union; weights multiply. Input order is preserved, with
/// the last list varying fastest.
///
/// # Errors
/// `InvalidArgument` when two lists share a parameter name, or when the
/// product contains two scenarios with the same identifier.
pub fn multiply(sep: &str, lists: &[&[Scenario]]) -> Result<Vec<Scenario>> {
    if lists.is_empty() {
        return Ok(Vec::new());
    }

    let count: usize = lists.iter().map(|l| l.len()).product();
    let mut out = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);
    let mut indexes = vec![0usize; lists.len()];

    'product: loop {
        let mut id = String::new();
        let mut params = BTreeMap::new();
        let mut weight = 1.0f64;
        for (list, &i) in lists.iter().zip(&indexes) {
            let Some(part) = list.get(i) else {
                // An empty list empties the whole product.
                break 'product;
            };
            if !id.is_empty() {
                id.push_str(sep);
            }
            id.push_str(&part.id);
            for (name, value) in &part.params {
                if params.insert(name.clone(), value.clone()).is_some() {
                    return Err(Error::InvalidArgument(format!(
                        "parameter {} appears in more than one scenario list",
                        name
                    )));
                }
            }
            weight *= part.weight;
        }
        if !seen.insert(id.clone()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate scenario identifier {:?} after multiplication",
                id
            )));
        }
        out.push(Scenario { id, params, weight });

        // Odometer increment, last list fastest.
        for pos in (0..lists.len()).rev() {
            indexes[pos] += 1;
            if indexes[pos] < lists[pos].len() {
                continue 'product;
            }
            indexes[pos] = 0;
        }
        break;
    }
    Ok(out)
}

/// Select at most `cap` scenarios, deterministically.
///
/// With no explicit `seed` one is derived from the scenario identifiers,
/// so repeated runs over the same product agree. Heavier weights are more
/// likely to survive. The retained subset keeps input order.
pub fn prune(scenarios: Vec<Scenario>, cap: usize, seed: Option<u64>) -> Vec<Scenario> {
    if scenarios.len() <= cap {
        return scenarios;
    }
    let seed = seed.unwrap_or_else(|| {
        let joined = scenarios
            .iter()
            .map(Scenario::id)
            .collect::<Vec<_>>()
            .join("\n");
        xxh3_64(joined.as_bytes())
    });
    let mut rng = StdRng::seed_from_u64(seed);

    // Weighted reservoir keys: u^(1/w) favors heavy weights.
    let mut keyed: Vec<(usize, f64)> = scenarios
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let u: f64 = rng.gen();
            (i, u.powf(1.0 / s.weight.max(f64::MIN_POSITIVE)))
        })
        .collect();
    keyed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let keep: HashSet<usize> = keyed.iter().take(cap).map(|(i, _)| *i).collect();

    scenarios
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, s)| s)
        .collect()
}

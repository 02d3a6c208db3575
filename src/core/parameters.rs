//! Job parameters.
//!
//! A [`JobParameters`] set is supplied when a job is launched. Together with the
//! job name, its *identifying* parameters form the identity of a job instance:
//! launching twice with the same identifying parameters targets the same instance,
//! which is what makes restart possible. Non-identifying parameters are carried
//! along for the steps but do not take part in that identity.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BatchError;

/// Format used to parse and display date parameters.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
}

impl ParameterValue {
    /// Name of the value type, as used in `name(type)=value` arguments.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Date(_) => "date",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}", value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Double(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Long(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Double(value)
    }
}

impl From<NaiveDate> for ParameterValue {
    fn from(value: NaiveDate) -> Self {
        ParameterValue::Date(value)
    }
}

/// A parameter value and whether it identifies the job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Immutable set of named launch parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a parameter, or `None` if it is absent.
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name).map(|parameter| &parameter.value)
    }

    pub fn get_parameter(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParameterValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<NaiveDate> {
        match self.get(name) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Stable key built from the identifying parameters only.
    ///
    /// Two parameter sets with the same key address the same job instance. The
    /// key is a JSON object of `name: [type, value]` pairs sorted by name, so
    /// delimiters inside names or values cannot make two sets collide.
    pub fn identifying_key(&self) -> String {
        let entries = self
            .parameters
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(name, parameter)| {
                let value = Value::Array(vec![
                    Value::from(parameter.value.type_name()),
                    Value::from(parameter.value.to_string()),
                ]);
                (name.clone(), value)
            })
            .collect::<Map<String, Value>>();
        Value::Object(entries).to_string()
    }

    /// Returns a new set holding these parameters overridden by `other`.
    pub fn merge(&self, other: &JobParameters) -> JobParameters {
        let mut parameters = self.parameters.clone();
        for (name, parameter) in &other.parameters {
            parameters.insert(name.clone(), parameter.clone());
        }
        JobParameters { parameters }
    }

    /// Parses command-line style arguments.
    ///
    /// Accepted forms are `name=value` (string), `name(type)=value` where type is
    /// one of `string`, `long`, `double` or `date` (`YYYY-MM-DD`). A leading `-`
    /// marks the parameter as non-identifying.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_engine::core::parameters::JobParameters;
    ///
    /// let parameters = JobParameters::from_args(["requestDate=20180101", "-chunk(long)=10"]).unwrap();
    /// assert_eq!(parameters.get_string("requestDate"), Some("20180101"));
    /// assert_eq!(parameters.get_long("chunk"), Some(10));
    /// assert_eq!(parameters.identifying_key(), r#"{"requestDate":["string","20180101"]}"#);
    /// ```
    pub fn from_args<I, S>(args: I) -> Result<JobParameters, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = JobParametersBuilder::new();

        for arg in args {
            let arg = arg.as_ref().trim();
            let (identifying, arg) = match arg.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, arg),
            };

            let (key, raw_value) = arg.split_once('=').ok_or_else(|| {
                BatchError::Configuration(format!("Job parameter '{}' is not of the form name=value", arg))
            })?;

            let (name, type_name) = match key.strip_suffix(')').and_then(|k| k.split_once('(')) {
                Some((name, type_name)) => (name, type_name),
                None => (key, "string"),
            };

            if name.is_empty() {
                return Err(BatchError::Configuration(format!(
                    "Job parameter '{}' has an empty name",
                    arg
                )));
            }

            let value = parse_value(name, type_name, raw_value)?;
            builder = builder.add_parameter(name, JobParameter { value, identifying });
        }

        Ok(builder.build())
    }
}

fn parse_value(name: &str, type_name: &str, raw: &str) -> Result<ParameterValue, BatchError> {
    let invalid = |error: String| {
        BatchError::Configuration(format!(
            "Invalid value '{}' for {} parameter '{}': {}",
            raw, type_name, name, error
        ))
    };

    match type_name {
        "string" => Ok(ParameterValue::String(raw.to_string())),
        "long" => raw
            .parse::<i64>()
            .map(ParameterValue::Long)
            .map_err(|e| invalid(e.to_string())),
        "double" => raw
            .parse::<f64>()
            .map(ParameterValue::Double)
            .map_err(|e| invalid(e.to_string())),
        "date" => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(ParameterValue::Date)
            .map_err(|e| invalid(e.to_string())),
        other => Err(BatchError::Configuration(format!(
            "Unknown type '{}' for job parameter '{}'",
            other, name
        ))),
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .parameters
            .iter()
            .map(|(name, parameter)| format!("{}={}", name, parameter.value))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", entries.join(", "))
    }
}

/// Builder for [`JobParameters`].
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self {
            parameters: BTreeMap::new(),
        }
    }

    /// Starts from an existing parameter set.
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_string(self, name: &str, value: impl Into<String>) -> Self {
        self.add_identifying(name, ParameterValue::String(value.into()))
    }

    pub fn add_long(self, name: &str, value: i64) -> Self {
        self.add_identifying(name, ParameterValue::Long(value))
    }

    pub fn add_double(self, name: &str, value: f64) -> Self {
        self.add_identifying(name, ParameterValue::Double(value))
    }

    pub fn add_date(self, name: &str, value: NaiveDate) -> Self {
        self.add_identifying(name, ParameterValue::Date(value))
    }

    /// Adds a parameter that does not take part in the job instance identity.
    pub fn add_non_identifying(self, name: &str, value: impl Into<ParameterValue>) -> Self {
        self.add_parameter(
            name,
            JobParameter {
                value: value.into(),
                identifying: false,
            },
        )
    }

    pub fn add_parameter(mut self, name: &str, parameter: JobParameter) -> Self {
        self.parameters.insert(name.to_string(), parameter);
        self
    }

    fn add_identifying(self, name: &str, value: ParameterValue) -> Self {
        self.add_parameter(
            name,
            JobParameter {
                value,
                identifying: true,
            },
        )
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Derives the parameters of the next job instance from the previous ones.
///
/// Jobs carrying an incrementer start a new instance on every launch instead of
/// targeting the instance of the supplied parameters.
pub trait JobParametersIncrementer: Send + Sync {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a long `run.id` parameter on every launch.
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self::with_key("run.id")
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let previous = previous.cloned().unwrap_or_default();
        let run_id = previous.get_long(&self.key).unwrap_or(0) + 1;
        JobParametersBuilder::from_parameters(&previous)
            .add_long(&self.key, run_id)
            .build()
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 压测配置中的单个值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadValue {
    Int(i64),
    Text(String),
}

impl LoadValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            LoadValue::Int(n) => Some(*n),
            LoadValue::Text(_) => None,
        }
    }

    /// 以文本形式读取（整数也会被格式化）
    pub fn as_text(&self) -> String {
        match self {
            LoadValue::Int(n) => n.to_string(),
            LoadValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for LoadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadValue::Int(n) => write!(f, "{}", n),
            LoadValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for LoadValue {
    fn from(value: i64) -> Self {
        LoadValue::Int(value)
    }
}

impl From<&str> for LoadValue {
    fn from(value: &str) -> Self {
        LoadValue::Text(value.to_string())
    }
}

/// `@load` 指令解析出的压测配置，构建后不可变
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadConfig(BTreeMap<String, LoadValue>);

impl LoadConfig {
    /// 解析 `key=value` 列表
    ///
    /// 键值对之间以逗号或空白分隔，值可以用单引号或双引号包裹。
    /// 键会被转为小写后经过同义词表归一化，未知的键原样保留。
    pub fn parse(source: &str) -> Self {
        static PAIR_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = PAIR_REGEX.get_or_init(|| {
            Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*("[^"]*"|'[^']*'|[^\s,]+)\s*(?:,|\s|$)"#)
                .unwrap()
        });

        let mut entries = BTreeMap::new();
        for caps in re.captures_iter(source.trim()) {
            let key = normalize_key(&caps[1]);
            let raw = strip_quotes(caps[2].trim());

            let value = if is_integer_key(&key) {
                match raw.parse::<i64>() {
                    Ok(n) => LoadValue::Int(n),
                    Err(_) => LoadValue::Text(raw.to_string()),
                }
            } else {
                LoadValue::Text(raw.to_string())
            };
            entries.insert(key, value);
        }

        LoadConfig(entries)
    }

    pub fn get(&self, key: &str) -> Option<&LoadValue> {
        self.0.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(LoadValue::as_int)
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(LoadValue::as_text)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LoadValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<LoadValue>> FromIterator<(K, V)> for LoadConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        LoadConfig(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn strip_quotes(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted { &value[1..value.len() - 1] } else { value }
}

fn is_integer_key(key: &str) -> bool {
    matches!(
        key,
        "concurrent"
            | "iterations"
            | "start"
            | "max"
            | "spawnRate"
            | "requestsPerSecond"
            | "adaptiveBackoffStep"
    )
}

/// 同义词表
fn normalize_key(raw: &str) -> String {
    let canonical = match raw.trim().to_lowercase().as_str() {
        "concurrency" | "concurrent" | "users" | "user" | "u" => "concurrent",
        "amount" | "requests" | "requestcount" | "iterations" | "count" => "iterations",
        "runtime" | "duration" | "time" => "duration",
        "delay" | "wait" | "waittime" | "thinktime" => "delay",
        "minwait" | "waitmin" => "waitMin",
        "maxwait" | "waitmax" => "waitMax",
        "ramp" | "rampup" => "rampUp",
        "spawnrate" | "spawn_rate" | "r" => "spawnRate",
        "start" => "start",
        "startusers" => "startUsers",
        "max" => "max",
        "maxusers" => "maxUsers",
        "rps" | "requestspersecond" => "requestsPerSecond",
        "failureratethreshold" | "failurethreshold" | "failthreshold" | "failrate"
        | "maxfailurerate" | "maxfailure" | "failpct" | "failurepct" => "failureRateThreshold",
        "adaptive" | "autobackoff" | "autoadjust" | "autotune" | "backoff" | "stablebackoff" => {
            "adaptive"
        }
        "adaptivefailurerate"
        | "adaptivefailrate"
        | "adaptivefailure"
        | "adaptivefailurethreshold"
        | "adaptive_threshold" => "adaptiveFailureRate",
        "adaptivewindow" | "window" | "windowsec" | "windows" => "adaptiveWindow",
        "adaptivestable" | "stablesec" | "stablefor" | "stable" => "adaptiveStable",
        "adaptivecooldown" | "cooldown" => "adaptiveCooldown",
        "adaptivebackoffstep" | "backoffstep" | "backoffusers" => "adaptiveBackoffStep",
        _ => return raw.trim().to_string(),
    };
    canonical.to_string()
}

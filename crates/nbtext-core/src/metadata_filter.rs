//! # Metadata Filters
//!
//! A filter such as `kernelspec,-widgets,jupytext.text_representation`
//! decides which notebook or cell metadata reach the text file. `all` and
//! `-all` keep or drop everything, dotted keys address nested entries.
//!
//! The user filter is combined with a default one: notebooks keep only a few
//! entries by default, cells keep everything but a few technical entries.

use crate::cell_metadata::is_valid_metadata_key;
use crate::primitives::{DEFAULT_NOTEBOOK_METADATA, JUPYTEXT_CELL_METADATA};
use crate::types::{Metadata, NbTextError, Result, section, section_mut};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// FILTER MODEL
// =============================================================================

/// Either every key, or an explicit list of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKeys {
    All,
    Keys(Vec<String>),
}

impl Default for FilterKeys {
    fn default() -> Self {
        Self::Keys(Vec::new())
    }
}

impl FilterKeys {
    fn is_empty_list(&self) -> bool {
        matches!(self, Self::Keys(keys) if keys.is_empty())
    }

    fn keys(&self) -> &[String] {
        match self {
            Self::All => &[],
            Self::Keys(keys) => keys,
        }
    }

    fn from_list(keys: Vec<String>) -> Self {
        if keys.iter().any(|k| k == "all") {
            Self::All
        } else {
            Self::Keys(keys.into_iter().filter(|k| !k.is_empty()).collect())
        }
    }
}

/// Additional and excluded metadata keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataFilter {
    pub additional: FilterKeys,
    pub excluded: FilterKeys,
}

impl MetadataFilter {
    /// Parse a comma separated filter. Keys prefixed with `-` are excluded,
    /// other keys (optionally prefixed with `+`) are kept.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut additional = Vec::new();
        let mut excluded = Vec::new();
        let mut has_additional = false;
        let mut has_excluded = false;
        for key in text.split(',') {
            let key = key.trim();
            if let Some(rest) = key.strip_prefix('-') {
                has_excluded = true;
                excluded.push(rest.trim().to_string());
            } else if let Some(rest) = key.strip_prefix('+') {
                has_additional = true;
                additional.push(rest.trim().to_string());
            } else {
                has_additional = true;
                additional.push(key.to_string());
            }
        }
        Self {
            additional: if has_additional { FilterKeys::from_list(additional) } else { FilterKeys::default() },
            excluded: if has_excluded { FilterKeys::from_list(excluded) } else { FilterKeys::default() },
        }
    }

    /// A filter stored in metadata or configuration: a string, a boolean
    /// (`true` keeps all, `false` drops all), or an object with `additional`
    /// and `excluded` entries.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Bool(true) => Ok(Self {
                additional: FilterKeys::All,
                excluded: FilterKeys::default(),
            }),
            Value::Bool(false) => Ok(Self {
                additional: FilterKeys::default(),
                excluded: FilterKeys::All,
            }),
            Value::String(text) => Ok(Self::parse(text)),
            Value::Object(map) => {
                let mut filter = Self::default();
                for (name, keys) in map {
                    let keys = match keys {
                        Value::String(all) if all == "all" => FilterKeys::All,
                        Value::Array(items) => FilterKeys::Keys(
                            items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                        ),
                        other => {
                            return Err(NbTextError::InvalidFormat(format!(
                                "Invalid metadata filter entry {}: {}",
                                name, other
                            )));
                        }
                    };
                    match name.as_str() {
                        "additional" => filter.additional = keys,
                        "excluded" => filter.excluded = keys,
                        other => {
                            return Err(NbTextError::InvalidFormat(format!(
                                "Metadata filters only have 'additional' and 'excluded' entries, not '{}'",
                                other
                            )));
                        }
                    }
                }
                Ok(filter)
            }
            other => Err(NbTextError::InvalidFormat(format!(
                "Invalid metadata filter: {}",
                other
            ))),
        }
    }
}

impl From<&str> for MetadataFilter {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&metadata_filter_as_string(self))
    }
}

/// The comma separated form of a filter. Converter-internal cell keys are
/// never listed as additional keys.
#[must_use]
pub fn metadata_filter_as_string(filter: &MetadataFilter) -> String {
    let mut entries: Vec<String> = match &filter.additional {
        FilterKeys::All => vec!["all".to_string()],
        FilterKeys::Keys(keys) => keys
            .iter()
            .filter(|key| !JUPYTEXT_CELL_METADATA.contains(&key.as_str()))
            .cloned()
            .collect(),
    };
    match &filter.excluded {
        FilterKeys::All => entries.push("-all".to_string()),
        FilterKeys::Keys(keys) => entries.extend(keys.iter().map(|key| format!("-{key}"))),
    }
    entries.join(",")
}

// =============================================================================
// FILTER UPDATES
// =============================================================================

/// Record, in the notebook metadata of a notebook read from text, filters
/// that will write the same metadata back.
///
/// Without a `jupyter` header, the notebook metadata filter becomes `-all`
/// and the cell filter lists the cell keys found in the text. Otherwise the
/// existing filters are extended with the keys found.
pub fn update_metadata_filters(metadata: &mut Metadata, jupyter_md: bool, cell_metadata: &[String]) {
    if !jupyter_md {
        let jupytext = section_mut(metadata, "jupytext");
        jupytext.insert(
            "notebook_metadata_filter".to_string(),
            Value::String("-all".to_string()),
        );
        if !jupytext.contains_key("cell_metadata_filter") {
            let filter = MetadataFilter {
                additional: FilterKeys::Keys(cell_metadata.to_vec()),
                excluded: FilterKeys::All,
            };
            jupytext.insert(
                "cell_metadata_filter".to_string(),
                Value::String(metadata_filter_as_string(&filter)),
            );
        }
        return;
    }

    let existing_cell_filter = section(metadata, "jupytext")
        .and_then(|j| j.get("cell_metadata_filter"))
        .cloned();
    if let Some(existing) = existing_cell_filter {
        let mut filter = MetadataFilter::from_value(&existing).unwrap_or_default();
        if let FilterKeys::Keys(excluded) = &mut filter.excluded {
            excluded.retain(|key| !cell_metadata.contains(key));
        }
        if let FilterKeys::Keys(additional) = &mut filter.additional {
            for key in cell_metadata {
                if !additional.contains(key) {
                    additional.push(key.clone());
                }
            }
        }
        section_mut(metadata, "jupytext").insert(
            "cell_metadata_filter".to_string(),
            Value::String(metadata_filter_as_string(&filter)),
        );
        return;
    }

    let mut notebook_filter: Vec<String> = section(metadata, "jupytext")
        .and_then(|j| j.get("notebook_metadata_filter"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .split(',')
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    if notebook_filter.iter().any(|k| k == "all" || k == "-all") {
        return;
    }
    let defaults: Vec<&str> = DEFAULT_NOTEBOOK_METADATA.split(',').collect();
    for key in metadata.keys() {
        if defaults.contains(&key.as_str())
            || notebook_filter.contains(key)
            || notebook_filter.contains(&format!("-{key}"))
        {
            continue;
        }
        notebook_filter.push(key.clone());
    }
    if !notebook_filter.is_empty() {
        section_mut(metadata, "jupytext").insert(
            "notebook_metadata_filter".to_string(),
            Value::String(notebook_filter.join(",")),
        );
    }
}

// =============================================================================
// FILTERING
// =============================================================================

/// Filter notebook or cell metadata according to the user filter, on top of
/// the default filter.
///
/// A default filter that lists additional keys only (the notebook default)
/// excludes everything else. Keys that cannot be written as options are
/// dropped and collected in `unsupported_keys`.
#[must_use]
pub fn filter_metadata(
    metadata: &Metadata,
    user_filter: &MetadataFilter,
    default_filter: &MetadataFilter,
    unsupported_keys: Option<&mut BTreeSet<String>>,
) -> Metadata {
    let default_include = &default_filter.additional;
    let mut default_exclude = default_filter.excluded.clone();
    if matches!(default_include, FilterKeys::Keys(keys) if !keys.is_empty())
        && default_exclude.is_empty_list()
    {
        default_exclude = FilterKeys::All;
    }

    let user_include = &user_filter.additional;
    let user_exclude = &user_filter.excluded;

    if *user_include == FilterKeys::All {
        return subset_metadata(metadata, None, Some(user_exclude.keys()), unsupported_keys);
    }
    if *user_exclude == FilterKeys::All {
        return subset_metadata(metadata, Some(user_include.keys()), None, unsupported_keys);
    }

    if default_exclude == FilterKeys::All {
        let keep: Vec<String> = user_include
            .keys()
            .iter()
            .chain(default_include.keys())
            .cloned()
            .collect();
        return subset_metadata(metadata, Some(&keep), Some(user_exclude.keys()), unsupported_keys);
    }

    // empty tags are not written
    let mut metadata = metadata.clone();
    if metadata
        .get("tags")
        .is_some_and(|tags| tags.as_array().is_some_and(Vec::is_empty) || tags.is_null())
    {
        metadata.shift_remove("tags");
    }
    let exclude: Vec<String> = user_exclude
        .keys()
        .iter()
        .cloned()
        .chain(
            default_exclude
                .keys()
                .iter()
                .filter(|key| !user_include.keys().contains(key))
                .cloned(),
        )
        .collect();
    subset_metadata(&metadata, None, Some(&exclude), unsupported_keys)
}

/// Group dotted keys by their first component: `["I.a", "I.b"]` gives
/// `{"I": ["a", "b"]}`.
#[must_use]
pub fn second_level(keys: &[String]) -> Vec<(String, Vec<String>)> {
    let mut sub_keys: Vec<(String, Vec<String>)> = Vec::new();
    for key in keys {
        let Some((left, right)) = key.split_once('.') else {
            continue;
        };
        match sub_keys.iter_mut().find(|(name, _)| name == left) {
            Some((_, rights)) => rights.push(right.to_string()),
            None => sub_keys.push((left.to_string(), vec![right.to_string()])),
        }
    }
    sub_keys
}

fn subset_metadata(
    metadata: &Metadata,
    keep_only: Option<&[String]>,
    exclude: Option<&[String]>,
    mut unsupported_keys: Option<&mut BTreeSet<String>>,
) -> Metadata {
    let supported: Vec<&String> = metadata
        .keys()
        .filter(|key| {
            let valid = is_valid_metadata_key(key);
            if !valid {
                if let Some(unsupported) = unsupported_keys.as_deref_mut() {
                    unsupported.insert((*key).clone());
                }
            }
            valid
        })
        .collect();

    let mut filtered = Metadata::new();
    match keep_only {
        Some(keep_only) => {
            for key in &supported {
                if keep_only.contains(key) {
                    filtered.insert((*key).clone(), metadata[key.as_str()].clone());
                }
            }
            for (key, nested) in second_level(keep_only) {
                if !supported.contains(&&key) {
                    continue;
                }
                if let Some(Value::Object(inner)) = metadata.get(&key) {
                    let subset = subset_metadata(inner, Some(&nested), None, unsupported_keys.as_deref_mut());
                    filtered.insert(key, Value::Object(subset));
                }
            }
        }
        None => {
            for key in &supported {
                filtered.insert((*key).clone(), metadata[key.as_str()].clone());
            }
        }
    }

    if let Some(exclude) = exclude {
        for key in exclude {
            filtered.shift_remove(key);
        }
        for (key, nested) in second_level(exclude) {
            if let Some(Value::Object(inner)) = filtered.get(&key) {
                let subset = subset_metadata(inner, None, Some(&nested), unsupported_keys.as_deref_mut());
                filtered.insert(key, Value::Object(subset));
            }
        }
    }

    filtered
}

/// Complete metadata read from text with the entries of the original
/// metadata that the filter had removed.
#[must_use]
pub fn restore_filtered_metadata(
    filtered_metadata: &Metadata,
    unfiltered_metadata: &Metadata,
    user_filter: &MetadataFilter,
    default_filter: &MetadataFilter,
) -> Metadata {
    let visible = filter_metadata(unfiltered_metadata, user_filter, default_filter, None);
    let mut metadata = filtered_metadata.clone();
    for (key, value) in unfiltered_metadata {
        if !visible.contains_key(key) && !JUPYTEXT_CELL_METADATA.contains(&key.as_str()) {
            metadata.insert(key.clone(), value.clone());
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{DEFAULT_CELL_METADATA, IGNORE_CELL_METADATA};
    use serde_json::json;

    fn md(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn keys(list: &[&str]) -> FilterKeys {
        FilterKeys::Keys(list.iter().map(|k| k.to_string()).collect())
    }

    #[test]
    fn parse_filters() {
        assert_eq!(
            MetadataFilter::parse("a,+b,-c"),
            MetadataFilter { additional: keys(&["a", "b"]), excluded: keys(&["c"]) }
        );
        assert_eq!(
            MetadataFilter::parse("-all"),
            MetadataFilter { additional: FilterKeys::default(), excluded: FilterKeys::All }
        );
        assert_eq!(MetadataFilter::parse("all,-b").additional, FilterKeys::All);
    }

    #[test]
    fn filters_from_values() {
        assert_eq!(MetadataFilter::from_value(&json!(true)).ok().map(|f| f.additional), Some(FilterKeys::All));
        let filter = MetadataFilter::from_value(&json!({"additional": ["a"], "excluded": "all"})).ok();
        assert_eq!(filter.map(|f| f.to_string()), Some("a,-all".to_string()));
        assert!(MetadataFilter::from_value(&json!({"other": []})).is_err());
    }

    #[test]
    fn filter_as_string_hides_internal_keys() {
        let filter = MetadataFilter { additional: keys(&["tags", "lines_to_next_cell"]), excluded: FilterKeys::All };
        assert_eq!(metadata_filter_as_string(&filter), "tags,-all");
    }

    #[test]
    fn notebook_default_keeps_kernelspec_only() {
        let metadata = md(json!({"kernelspec": {"name": "python3"}, "widgets": {}, "language_info": {}}));
        let filtered = filter_metadata(&metadata, &MetadataFilter::default(), &DEFAULT_NOTEBOOK_METADATA.into(), None);
        assert_eq!(filtered, md(json!({"kernelspec": {"name": "python3"}})));
    }

    #[test]
    fn user_filter_adds_and_removes_notebook_metadata() {
        let metadata = md(json!({"kernelspec": {"name": "python3"}, "widgets": {}, "language_info": {"name": "python", "version": "3"}}));
        let filtered = filter_metadata(
            &metadata,
            &"language_info.name,-kernelspec".into(),
            &DEFAULT_NOTEBOOK_METADATA.into(),
            None,
        );
        assert_eq!(filtered, md(json!({"language_info": {"name": "python"}})));
    }

    #[test]
    fn cell_default_drops_ignored_keys_and_empty_tags() {
        let metadata = md(json!({"collapsed": true, "tags": [], "key": "value"}));
        let filtered = filter_metadata(&metadata, &MetadataFilter::default(), &IGNORE_CELL_METADATA.into(), None);
        assert_eq!(filtered, md(json!({"key": "value"})));
    }

    #[test]
    fn all_and_minus_all() {
        let metadata = md(json!({"a": 1, "b": 2}));
        let dropped = filter_metadata(&metadata, &DEFAULT_CELL_METADATA.into(), &IGNORE_CELL_METADATA.into(), None);
        assert!(dropped.is_empty());
        let kept = filter_metadata(&metadata, &"a,-all".into(), &IGNORE_CELL_METADATA.into(), None);
        assert_eq!(kept, md(json!({"a": 1})));
        let all = filter_metadata(&metadata, &"all,-b".into(), &DEFAULT_NOTEBOOK_METADATA.into(), None);
        assert_eq!(all, md(json!({"a": 1})));
    }

    #[test]
    fn unsupported_keys_are_collected() {
        let metadata = md(json!({"a b": 1, "c": 2}));
        let mut unsupported = BTreeSet::new();
        let filtered = filter_metadata(&metadata, &MetadataFilter::default(), &IGNORE_CELL_METADATA.into(), Some(&mut unsupported));
        assert_eq!(filtered, md(json!({"c": 2})));
        assert!(unsupported.contains("a b"));
    }

    #[test]
    fn update_filters_without_jupyter_header() {
        let mut metadata = Metadata::new();
        update_metadata_filters(&mut metadata, false, &["tags".to_string(), "key".to_string()]);
        assert_eq!(
            metadata["jupytext"],
            json!({"notebook_metadata_filter": "-all", "cell_metadata_filter": "tags,key,-all"})
        );
    }

    #[test]
    fn update_existing_cell_filter() {
        let mut metadata = md(json!({"jupytext": {"cell_metadata_filter": "a,-b"}}));
        update_metadata_filters(&mut metadata, true, &["b".to_string(), "c".to_string()]);
        assert_eq!(metadata["jupytext"]["cell_metadata_filter"], json!("a,b,c"));
    }

    #[test]
    fn update_notebook_filter_with_extra_keys() {
        let mut metadata = md(json!({"kernelspec": {}, "author": "me"}));
        update_metadata_filters(&mut metadata, true, &[]);
        assert_eq!(metadata["jupytext"]["notebook_metadata_filter"], json!("author"));
    }

    #[test]
    fn restore_filtered_entries() {
        let unfiltered = md(json!({"collapsed": true, "key": "old", "lines_to_next_cell": 2}));
        let filtered = md(json!({"key": "new"}));
        let restored = restore_filtered_metadata(&filtered, &unfiltered, &MetadataFilter::default(), &IGNORE_CELL_METADATA.into());
        assert_eq!(restored, md(json!({"key": "new", "collapsed": true})));
    }

    #[test]
    fn second_level_groups_keys() {
        let keys = vec!["I.a".to_string(), "I.b".to_string(), "J.c.d".to_string(), "K".to_string()];
        assert_eq!(
            second_level(&keys),
            vec![
                ("I".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("J".to_string(), vec!["c.d".to_string()]),
            ]
        );
    }
}

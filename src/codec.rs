pub mod changeset;
pub mod diff;

use std::collections::HashMap;
use std::fmt::Display;
use std::str::{self, FromStr};

use quick_xml::events::BytesStart;

use crate::errors::{Error, Result};

/// Attributes of an element, unescaped.
pub(crate) fn attributes(el: &BytesStart) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        let key = str::from_utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

pub(crate) fn required<T>(attrs: &HashMap<String, String>, name: &str, element: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = attrs.get(name)
        .ok_or_else(|| Error::new(format!("<{element}> lacks attribute '{name}'")))?;
    raw.parse()
        .map_err(|e| Error::new(format!("<{element}> attribute '{name}'=\"{raw}\": {e}")))
}

pub(crate) fn optional<T>(attrs: &HashMap<String, String>, name: &str, element: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match attrs.get(name) {
        Some(_) => required(attrs, name, element).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn element(name: &str, attrs: &[(&str, &str)]) -> BytesStart<'static> {
    let mut el = BytesStart::new(name.to_string());
    for attr in attrs {
        el.push_attribute(*attr);
    }
    el
}

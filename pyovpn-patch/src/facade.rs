//! Facade module source generation
//!
//! The replacement `uprop` module is a thin facade over the renamed original.
//! When the original defines the licensing class, it installs one wrapper on
//! it, built by a factory that closes over the original method. It then
//! re-binds every public name of the original module in its own namespace
//! using `dir()`. No statement is ever assembled as text and executed.

/// Value forced into the usage properties mapping
pub const CONCURRENT_CONNECTIONS: i64 = 200;

/// A return-value override on one method of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOverride {
    /// Class owning the method
    pub class: String,
    /// Method whose returned mapping is post-processed
    pub method: String,
    /// Mapping key that is overwritten
    pub key: String,
    /// Value stored under `key`
    pub value: i64,
}

impl ReturnOverride {
    /// Force `UsageProperties.figure()[key]` to `value`
    pub fn usage_property(key: &str, value: i64) -> Self {
        Self {
            class: "UsageProperties".to_string(),
            method: "figure".to_string(),
            key: key.to_string(),
            value,
        }
    }
}

impl Default for ReturnOverride {
    fn default() -> Self {
        Self::usage_property("concurrent_connections", CONCURRENT_CONNECTIONS)
    }
}

/// Source of a facade module re-exporting `package.inner`
#[derive(Debug, Clone)]
pub struct FacadeModule<'a> {
    package: &'a str,
    inner: &'a str,
    patch: &'a ReturnOverride,
}

impl<'a> FacadeModule<'a> {
    /// Facade over `package.inner` applying `patch`
    pub fn new(package: &'a str, inner: &'a str, patch: &'a ReturnOverride) -> Self {
        Self {
            package,
            inner,
            patch,
        }
    }

    /// Render the Python source
    ///
    /// The class is only wrapped when the inner module defines it, so a
    /// module without it is passed through unchanged.
    pub fn render(&self) -> String {
        let ReturnOverride {
            class,
            method,
            key,
            value,
        } = self.patch;
        let package = self.package;
        let inner = self.inner;
        let key = python_str_literal(key);
        let class_name = python_str_literal(class);

        format!(
            "\
from {package} import {inner} as _inner


def _override_{method}(original):
    def {method}(self, *args, **kwargs):
        ret = original(self, *args, **kwargs)
        ret[{key}] = {value}
        return ret
    {method}.__wrapped__ = original
    return {method}


if hasattr(_inner, {class_name}):
    _inner.{class}.{method} = _override_{method}(_inner.{class}.{method})

globals().update(
    (name, getattr(_inner, name)) for name in dir(_inner) if not name.startswith('__')
)
"
        )
    }
}

/// Quote a string as a single-quoted Python literal
fn python_str_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

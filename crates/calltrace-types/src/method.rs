use facet::Facet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{FunctionId, InvariantError};

/// Name used for every part of a placeholder method.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Identity of a method observed during one trace session.
///
/// Equality and hashing only look at `function_id`: two records with the same
/// id are the same logical method even if one of them is a placeholder.
#[derive(Facet, Clone, Debug)]
pub struct MethodInfo {
    pub function_id: FunctionId,

    /// Path of the module that defines the method.
    pub module_path: String,

    /// Fully qualified name of the declaring type.
    pub type_name: String,

    pub method_name: String,

    /// Set when this id was referenced by a call before its metadata arrived.
    pub was_unknown: bool,

    /// Synthesized because no metadata was known when the id was first seen.
    pub placeholder: bool,
}

impl MethodInfo {
    pub fn new(
        function_id: FunctionId,
        module_path: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Result<Self, InvariantError> {
        let module_path = module_path.into();
        let type_name = type_name.into();
        let method_name = method_name.into();
        if module_path.is_empty() {
            return Err(InvariantError::EmptyField("module_path"));
        }
        if type_name.is_empty() {
            return Err(InvariantError::EmptyField("type_name"));
        }
        if method_name.is_empty() {
            return Err(InvariantError::EmptyField("method_name"));
        }
        Ok(Self {
            function_id,
            module_path,
            type_name,
            method_name,
            was_unknown: false,
            placeholder: false,
        })
    }

    /// Stand-in for a function id whose metadata has not been seen.
    pub fn placeholder(function_id: FunctionId) -> Self {
        Self {
            function_id,
            module_path: UNKNOWN_NAME.to_owned(),
            type_name: UNKNOWN_NAME.to_owned(),
            method_name: UNKNOWN_NAME.to_owned(),
            was_unknown: false,
            placeholder: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Module file name without its directory.
    pub fn module_name(&self) -> &str {
        self.module_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.module_path.as_str())
    }
}

impl PartialEq for MethodInfo {
    fn eq(&self, other: &Self) -> bool {
        self.function_id == other.function_id
    }
}

impl Eq for MethodInfo {}

impl Hash for MethodInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.function_id.hash(state);
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.placeholder {
            return write!(f, "{UNKNOWN_NAME}({})", self.function_id);
        }
        write!(f, "{}.{}", self.type_name, self.method_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_everything_but_function_id() {
        let a = MethodInfo::new(FunctionId(7), "/app/Lib.dll", "Lib.Widget", "Spin").unwrap();
        let b = MethodInfo::placeholder(FunctionId(7));
        let c = MethodInfo::new(FunctionId(8), "/app/Lib.dll", "Lib.Widget", "Spin").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn placeholder_uses_unknown_names() {
        let info = MethodInfo::placeholder(FunctionId(999));
        assert_eq!(info.module_path, "Unknown");
        assert_eq!(info.module_name(), "Unknown");
        assert!(info.is_placeholder());
        assert_eq!(info.to_string(), "Unknown(0x3e7)");
    }

    #[test]
    fn rejects_empty_names() {
        let err = MethodInfo::new(FunctionId(1), "", "T", "M").unwrap_err();
        assert_eq!(err, InvariantError::EmptyField("module_path"));
    }

    #[test]
    fn module_name_strips_directories() {
        let unix = MethodInfo::new(FunctionId(1), "/opt/app/Core.dll", "T", "M").unwrap();
        let windows = MethodInfo::new(FunctionId(1), r"C:\app\Core.dll", "T", "M").unwrap();
        assert_eq!(unix.module_name(), "Core.dll");
        assert_eq!(windows.module_name(), "Core.dll");
    }
}

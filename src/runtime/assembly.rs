//! Assembly identities and definitions.

use std::{fmt, sync::Arc};

use crate::runtime::RuntimeType;

/// Identity of a loaded assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInfo {
    /// Simple name, e.g. `mscorlib`
    pub name: String,
    /// Four-part version
    pub version: [u16; 4],
    /// Culture, `neutral` when culture-invariant
    pub culture: String,
    /// Public key token as lowercase hex, if strong named
    pub public_key_token: Option<String>,
}

impl AssemblyInfo {
    /// Display name, e.g. `mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!(
            "{}, Version={}.{}.{}.{}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version[0],
            self.version[1],
            self.version[2],
            self.version[3],
            self.culture,
            self.public_key_token.as_deref().unwrap_or("null")
        )
    }
}

impl fmt::Display for AssemblyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// An assembly ready to be loaded: identity plus the types it defines
pub struct AssemblyDef {
    info: AssemblyInfo,
    types: Vec<RuntimeType>,
}

impl AssemblyDef {
    /// Creates an empty assembly definition with version 1.0.0.0
    ///
    /// ## Arguments
    /// * `name` - Simple assembly name
    pub fn new(name: &str) -> Self {
        AssemblyDef {
            info: AssemblyInfo {
                name: name.to_string(),
                version: [1, 0, 0, 0],
                culture: "neutral".to_string(),
                public_key_token: None,
            },
            types: Vec::new(),
        }
    }

    /// Sets the version
    #[must_use]
    pub fn version(mut self, major: u16, minor: u16, build: u16, revision: u16) -> Self {
        self.info.version = [major, minor, build, revision];
        self
    }

    /// Sets the public key token
    #[must_use]
    pub fn public_key_token(mut self, token: &str) -> Self {
        self.info.public_key_token = Some(token.to_string());
        self
    }

    /// Adds a type, builder style
    #[must_use]
    pub fn with_type(mut self, ty: RuntimeType) -> Self {
        self.types.push(ty);
        self
    }

    /// Adds a type
    pub fn add(&mut self, ty: RuntimeType) {
        self.types.push(ty);
    }

    /// The assembly identity
    pub fn info(&self) -> &AssemblyInfo {
        &self.info
    }

    /// The defined types
    pub fn types(&self) -> &[RuntimeType] {
        &self.types
    }

    pub(crate) fn into_parts(self) -> (AssemblyInfo, Vec<RuntimeType>) {
        (self.info, self.types)
    }
}

/// Produces an assembly definition on demand, used by the runtime's catalog of importable
/// assemblies
pub type AssemblyFactory = Arc<dyn Fn() -> AssemblyDef + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let def = AssemblyDef::new("mscorlib")
            .version(4, 0, 0, 0)
            .public_key_token("b77a5c561934e089");
        assert_eq!(
            def.info().full_name(),
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );

        let plain = AssemblyDef::new("Contoso");
        assert_eq!(
            plain.info().to_string(),
            "Contoso, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }
}

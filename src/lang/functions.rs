//! Built-in effect functions and their parameter signatures.
//!
//! The chaining operator only accepts these names; everything else after a
//! `.` is a semantic error. All built-in parameters take numeric values.

/// Signature of a built-in function.
#[derive(Debug, Clone, Copy)]
pub struct FnSig {
    pub name: &'static str,
    pub params: &'static [&'static str],
}

const BUILTINS: &[FnSig] = &[
    FnSig { name: "gain", params: &["amount"] },
    FnSig { name: "pan", params: &["position"] },
    FnSig { name: "speed", params: &["rate"] },
    FnSig { name: "cutoff", params: &["freq"] },
    FnSig { name: "delay", params: &["time", "feedback"] },
    FnSig { name: "reverb", params: &["mix"] },
];

/// Look up a built-in function by name.
pub fn signature(name: &str) -> Option<&'static FnSig> {
    BUILTINS.iter().find(|f| f.name == name)
}

/// Whether `name` is a known built-in function.
pub fn is_function(name: &str) -> bool {
    signature(name).is_some()
}

impl FnSig {
    /// Whether this function accepts a parameter called `key`.
    pub fn accepts(&self, key: &str) -> bool {
        self.params.contains(&key)
    }
}

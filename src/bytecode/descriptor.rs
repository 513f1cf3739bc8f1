//! The descriptor grammar shared by fields, methods, and type references
//!
//! Descriptors use the compact form: primitive letters (`B C S Z I J F D V`),
//! `Lpkg/Cls;` for class references, `[elem` for arrays, and `(args)ret` for
//! method signatures. The rewriter walks a descriptor token by token and maps
//! every embedded class name through a caller-supplied function, so the same
//! routine serves the type-name mapper and the array pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from descriptor parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("Unexpected character '{found}' in descriptor '{descriptor}' at {at}")]
    UnexpectedToken {
        descriptor: String,
        found: char,
        at: usize,
    },

    #[error("Descriptor '{descriptor}' ends mid-token")]
    Truncated { descriptor: String },
}

/// The resolved type of one field slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    /// A class reference, by internal name (`pkg/Cls`)
    Ref(String),
}

impl FieldType {
    /// Serialized width in bytes; references count as a machine word.
    pub fn size_bytes(&self) -> u64 {
        match self {
            FieldType::Bool | FieldType::Byte => 1,
            FieldType::Short | FieldType::Char => 2,
            FieldType::Int | FieldType::Float => 4,
            FieldType::Long | FieldType::Double => 8,
            FieldType::Ref(_) => 8,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Ref(_))
    }
}

/// Parse a single field descriptor such as `I` or `Lcom/x/Y;`.
///
/// Array descriptors are refused here: after the array pass every array is a
/// wrapper class reference, so a `[` reaching a field layout is a pipeline
/// ordering bug at the call site, surfaced as `UnexpectedToken`.
pub fn parse_field_type(descriptor: &str) -> Result<FieldType, DescriptorError> {
    let mut chars = descriptor.char_indices();
    let (at, c) = chars.next().ok_or_else(|| DescriptorError::Truncated {
        descriptor: descriptor.to_string(),
    })?;
    let ty = match c {
        'Z' => FieldType::Bool,
        'B' => FieldType::Byte,
        'S' => FieldType::Short,
        'C' => FieldType::Char,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'F' => FieldType::Float,
        'D' => FieldType::Double,
        'L' => {
            if !descriptor.ends_with(';') || descriptor.len() < 3 {
                return Err(DescriptorError::Truncated {
                    descriptor: descriptor.to_string(),
                });
            }
            FieldType::Ref(descriptor[1..descriptor.len() - 1].to_string())
        }
        other => {
            return Err(DescriptorError::UnexpectedToken {
                descriptor: descriptor.to_string(),
                found: other,
                at,
            })
        }
    };
    Ok(ty)
}

/// A parsed method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub params: Vec<String>,
    pub ret: Option<String>,
}

/// Split a method descriptor into parameter and return descriptors.
pub fn parse_method_descriptor(descriptor: &str) -> Result<MethodSig, DescriptorError> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(DescriptorError::UnexpectedToken {
            descriptor: descriptor.to_string(),
            found: descriptor.chars().next().unwrap_or('\0'),
            at: 0,
        });
    }
    let close = descriptor
        .find(')')
        .ok_or_else(|| DescriptorError::Truncated {
            descriptor: descriptor.to_string(),
        })?;
    let mut params = Vec::new();
    let mut from = 1;
    while from < close {
        let end = token_end(descriptor, from)?;
        params.push(descriptor[from..end].to_string());
        from = end;
    }
    let ret_desc = &descriptor[close + 1..];
    let ret = match ret_desc {
        "V" => None,
        "" => {
            return Err(DescriptorError::Truncated {
                descriptor: descriptor.to_string(),
            })
        }
        other => Some(other.to_string()),
    };
    Ok(MethodSig { params, ret })
}

/// Rewrite a field or method descriptor, mapping every class name through
/// `map`. Primitive letters pass through, `L…;` references are rewritten,
/// `[` recurses into the element, and `(…)R` recurses into both halves.
pub fn rewrite<F>(descriptor: &str, map: &F) -> Result<String, DescriptorError>
where
    F: Fn(&str) -> String,
{
    let mut out = String::with_capacity(descriptor.len());
    let mut from = 0;
    while from < descriptor.len() {
        from = rewrite_token(&mut out, descriptor, from, map)?;
    }
    Ok(out)
}

fn rewrite_token<F>(
    out: &mut String,
    descriptor: &str,
    from: usize,
    map: &F,
) -> Result<usize, DescriptorError>
where
    F: Fn(&str) -> String,
{
    let c = descriptor
        .as_bytes()
        .get(from)
        .copied()
        .ok_or_else(|| DescriptorError::Truncated {
            descriptor: descriptor.to_string(),
        })? as char;
    match c {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'V' => {
            out.push(c);
            Ok(from + 1)
        }
        'L' => {
            let semi =
                descriptor[from..]
                    .find(';')
                    .ok_or_else(|| DescriptorError::Truncated {
                        descriptor: descriptor.to_string(),
                    })?
                    + from;
            out.push('L');
            out.push_str(&map(&descriptor[from + 1..semi]));
            out.push(';');
            Ok(semi + 1)
        }
        '[' => {
            out.push('[');
            rewrite_token(out, descriptor, from + 1, map)
        }
        '(' => {
            let close =
                descriptor[from..]
                    .find(')')
                    .ok_or_else(|| DescriptorError::Truncated {
                        descriptor: descriptor.to_string(),
                    })?
                    + from;
            out.push('(');
            let mut inner = from + 1;
            while inner < close {
                inner = rewrite_token(out, descriptor, inner, map)?;
            }
            out.push(')');
            Ok(close + 1)
        }
        other => Err(DescriptorError::UnexpectedToken {
            descriptor: descriptor.to_string(),
            found: other,
            at: from,
        }),
    }
}


fn token_end(descriptor: &str, from: usize) -> Result<usize, DescriptorError> {
    let c = descriptor
        .as_bytes()
        .get(from)
        .copied()
        .ok_or_else(|| DescriptorError::Truncated {
            descriptor: descriptor.to_string(),
        })? as char;
    match c {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'V' => Ok(from + 1),
        'L' => descriptor[from..]
            .find(';')
            .map(|semi| from + semi + 1)
            .ok_or_else(|| DescriptorError::Truncated {
                descriptor: descriptor.to_string(),
            }),
        '[' => token_end(descriptor, from + 1),
        other => Err(DescriptorError::UnexpectedToken {
            descriptor: descriptor.to_string(),
            found: other,
            at: from,
        }),
    }
}

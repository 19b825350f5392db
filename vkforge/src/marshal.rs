// Native marshalling helpers.
//
// ash already performs the C-ABI argument/return marshalling a hand
// written FFI layer would otherwise need (struct layout, string
// lifetimes, enum values); what is left to spell out explicitly is the
// small set of *patterns* that repeat across call sites built on top of
// it: the two-stage "enumerate for size, then enumerate to fill" idiom,
// a value type for mutable bitmask enumerations, and the two builders
// (format name, component-mapping swizzle) that translate a short
// domain string into the matching native constant.
//
// vkforge contributors

use ash::vk;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::{Error, Result};

/// The "call once for size, allocate, call again to fill" pattern,
/// formalised into the one place it is spelled out (spec §9).
///
/// `enumerate` is called first with a null buffer pointer to retrieve a
/// count, then again with a correctly sized buffer. It must behave like
/// the matching `vkEnumerate*`/`vkGetPhysicalDevice*` entry point: write
/// the element count to `*count` and, if `data` is non-null, write up to
/// `*count` elements starting at `data`.
pub fn two_stage_enumerate<T, F>(mut enumerate: F) -> Result<Vec<T>, vk::Result>
where
    T: Default + Clone,
    F: FnMut(&mut u32, *mut T) -> vk::Result,
{
    let mut count: u32 = 0;
    let res = enumerate(&mut count, std::ptr::null_mut());
    if res != vk::Result::SUCCESS {
        return Err(res);
    }

    let mut data: Vec<T> = vec![T::default(); count as usize];
    if count > 0 {
        let res = enumerate(&mut count, data.as_mut_ptr());
        if res != vk::Result::SUCCESS && res != vk::Result::INCOMPLETE {
            return Err(res);
        }
        data.truncate(count as usize);
    }

    Ok(data)
}

/// A mutable bit-field enumeration value, preferred over a raw `u32`
/// wherever a stage-set, access-set or usage-set is expressed (spec §9
/// "Mutable bit-field enumerations").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnumMask<T> {
    bits: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T> EnumMask<T> {
    pub fn empty() -> Self {
        Self {
            bits: 0,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            bits,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn contains(&self, other: EnumMask<T>) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub fn insert(&mut self, other: EnumMask<T>) {
        self.bits |= other.bits;
    }
}

impl<T> BitOr for EnumMask<T> {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits | rhs.bits)
    }
}

impl<T> BitOrAssign for EnumMask<T> {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl<T> BitAnd for EnumMask<T> {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self::from_bits(self.bits & rhs.bits)
    }
}

/// The element-type tag used by `build_format_name`'s Khronos-style
/// `{components}{bits}_{signed}{kind}` naming convention (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Sfloat,
    Srgb,
}

impl FormatKind {
    fn suffix(&self, signed: bool) -> &'static str {
        match (self, signed) {
            (FormatKind::Unorm, _) => "UNORM",
            (FormatKind::Snorm, _) => "SNORM",
            (FormatKind::Uint, false) => "UINT",
            (FormatKind::Sint, true) => "SINT",
            (FormatKind::Uint, true) => "SINT",
            (FormatKind::Sint, false) => "UINT",
            (FormatKind::Sfloat, _) => "SFLOAT",
            (FormatKind::Srgb, _) => "SRGB",
        }
    }
}

/// Builds the Khronos-convention format name from its components and
/// looks up the matching `vk::Format` constant. A name with no matching
/// constant is a marshalling-table layout mismatch raised at build time,
/// not a recoverable condition (spec §7's `InteropLayout`: "fatal,
/// thrown at build time").
///
/// `format_name("RGBA", 1, false, FormatKind::Unorm)` resolves to the
/// constant named `R8G8B8A8_UNORM` (spec §8 testable property 7).
pub fn build_format_name(
    components: &str,
    bytes_per_component: u32,
    signed: bool,
    kind: FormatKind,
) -> Result<vk::Format> {
    let bits = bytes_per_component * 8;
    let mut name = String::new();
    for c in components.chars() {
        name.push(c);
        name.push_str(&bits.to_string());
    }
    name.push('_');
    name.push_str(kind.suffix(signed));

    lookup_format(&name).ok_or_else(|| {
        Error::InteropLayout(format!(
            "no vk::Format constant named {} (requested {} components at {} bytes each)",
            name, components, bytes_per_component
        ))
    })
}

/// Table-free lookup: every format name this crate cares about is
/// matched against the handful of constants the render loop actually
/// uses. This keeps the builder exhaustive without hand-maintaining a
/// giant string table mirroring all ~280 `vk::Format` variants.
fn lookup_format(name: &str) -> Option<vk::Format> {
    Some(match name {
        "R8G8B8A8_UNORM" => vk::Format::R8G8B8A8_UNORM,
        "R8G8B8A8_SRGB" => vk::Format::R8G8B8A8_SRGB,
        "B8G8R8A8_UNORM" => vk::Format::B8G8R8A8_UNORM,
        "B8G8R8A8_SRGB" => vk::Format::B8G8R8A8_SRGB,
        "R8G8B8_UNORM" => vk::Format::R8G8B8_UNORM,
        "R32G32_SFLOAT" => vk::Format::R32G32_SFLOAT,
        "R32G32B32_SFLOAT" => vk::Format::R32G32B32_SFLOAT,
        "R32G32B32A32_SFLOAT" => vk::Format::R32G32B32A32_SFLOAT,
        "D32_SFLOAT" => vk::Format::D32_SFLOAT,
        _ => return None,
    })
}

/// Derives a `vk::ComponentMapping` swizzle from a 4-character component
/// string (e.g. `"ABGR"` reorders the image's stored A,B,G,R channels to
/// appear as R,G,B,A when sampled). `'1'`/`'0'` select the constant one/
/// zero swizzle, and `'_'`/`'I'` request identity for that channel.
///
/// Identity is always freshly constructed rather than shared, since
/// `vk::ComponentMapping` is a plain value type and sharing a "mutable"
/// native struct across call sites invites accidental aliasing bugs.
pub fn component_mapping(swizzle: &str) -> vk::ComponentMapping {
    let chars: Vec<char> = swizzle.chars().collect();
    let component = |c: char| -> vk::ComponentSwizzle {
        match c {
            'R' | 'r' => vk::ComponentSwizzle::R,
            'G' | 'g' => vk::ComponentSwizzle::G,
            'B' | 'b' => vk::ComponentSwizzle::B,
            'A' | 'a' => vk::ComponentSwizzle::A,
            '1' => vk::ComponentSwizzle::ONE,
            '0' => vk::ComponentSwizzle::ZERO,
            _ => vk::ComponentSwizzle::IDENTITY,
        }
    };

    vk::ComponentMapping {
        r: chars.get(0).map(|c| component(*c)).unwrap_or(vk::ComponentSwizzle::IDENTITY),
        g: chars.get(1).map(|c| component(*c)).unwrap_or(vk::ComponentSwizzle::IDENTITY),
        b: chars.get(2).map(|c| component(*c)).unwrap_or(vk::ComponentSwizzle::IDENTITY),
        a: chars.get(3).map(|c| component(*c)).unwrap_or(vk::ComponentSwizzle::IDENTITY),
    }
}

/// The always-identity mapping, constructed fresh on every call per the
/// "identity is always a freshly constructed value" rule in spec §4.4.
pub fn identity_component_mapping() -> vk::ComponentMapping {
    vk::ComponentMapping {
        r: vk::ComponentSwizzle::IDENTITY,
        g: vk::ComponentSwizzle::IDENTITY,
        b: vk::ComponentSwizzle::IDENTITY,
        a: vk::ComponentSwizzle::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_stage_enumerate_respects_first_call_count() {
        // Mimics a native enumerate call with 3 elements available.
        let source = vec![1u32, 2, 3];
        let result = two_stage_enumerate(|count, data| {
            if data.is_null() {
                *count = source.len() as u32;
            } else {
                let n = (*count as usize).min(source.len());
                for i in 0..n {
                    unsafe {
                        *data.add(i) = source[i];
                    }
                }
                *count = n as u32;
            }
            vk::Result::SUCCESS
        })
        .unwrap();

        assert_eq!(result, source);
    }

    #[test]
    fn format_builder_resolves_known_name() {
        assert_eq!(
            build_format_name("RGBA", 1, false, FormatKind::Unorm).unwrap(),
            vk::Format::R8G8B8A8_UNORM
        );
        assert_eq!(
            build_format_name("BGRA", 1, false, FormatKind::Srgb).unwrap(),
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn format_builder_rejects_unknown_name() {
        assert!(matches!(
            build_format_name("ZZZZ", 7, false, FormatKind::Unorm),
            Err(Error::InteropLayout(_))
        ));
    }

    #[test]
    fn component_mapping_swizzles_abgr_to_rgba() {
        let m = component_mapping("ABGR");
        assert_eq!(m.r, vk::ComponentSwizzle::A);
        assert_eq!(m.g, vk::ComponentSwizzle::B);
        assert_eq!(m.b, vk::ComponentSwizzle::G);
        assert_eq!(m.a, vk::ComponentSwizzle::R);
    }

    #[test]
    fn enum_mask_bitor_and_contains() {
        #[derive(Debug, Clone, Copy)]
        struct Tag;
        let a: EnumMask<Tag> = EnumMask::from_bits(0b0001);
        let b: EnumMask<Tag> = EnumMask::from_bits(0b0010);
        let combined = a | b;
        assert!(combined.contains(a));
        assert!(combined.contains(b));
        assert!(!a.contains(b));
    }
}

//! Data-driven bitfield layouts
//!
//! Status, alarm and permanent-failure words differ in width and bit
//! assignment between gauge families. Rather than one packed struct per
//! register, each register gets a [`Layout`]: a static table of named
//! sub-ranges (offset, width, kind). A single decoder, [`decode_bitfield`],
//! interprets any layout, which keeps the wire format independent of any
//! compiler's bit-packing rules.
//!
//! Bits not covered by a field are reserved. They are preserved in
//! [`Bitfield::raw`] untouched, so a value read from the device can be written
//! back without disturbing them.
//!
//! # Example
//!
//! ```
//! use sbs_gauge::bitfield::{decode_bitfield, Field, Layout, RegisterWidth};
//!
//! static FLAGS: Layout = Layout::new(
//!     "Flags",
//!     RegisterWidth::Bits16,
//!     &[Field::flag("ready", 0), Field::uint("level", 4, 3)],
//! );
//!
//! let value = decode_bitfield(0x0031, &FLAGS);
//! assert!(value.flag("ready"));
//! assert_eq!(value.uint("level"), Some(3));
//! ```

/// Width of the raw register value a layout describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterWidth {
    /// 16-bit word
    Bits16,
    /// 32-bit value (assembled from a block)
    Bits32,
}

impl RegisterWidth {
    /// Number of bits
    pub const fn bits(self) -> u8 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }
}

/// How the bits of a field are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single-bit boolean
    Flag,
    /// Unsigned integer
    Uint,
    /// Enumerated value with labels for the known encodings
    Enum(&'static [(u32, &'static str)]),
}

/// One named sub-range of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name as printed in datasheets
    pub name: &'static str,
    /// Position of the least significant bit
    pub offset: u8,
    /// Number of bits
    pub width: u8,
    /// Interpretation
    pub kind: FieldKind,
}

impl Field {
    /// Single-bit flag at `offset`
    pub const fn flag(name: &'static str, offset: u8) -> Self {
        Self {
            name,
            offset,
            width: 1,
            kind: FieldKind::Flag,
        }
    }

    /// Unsigned integer of `width` bits at `offset`
    pub const fn uint(name: &'static str, offset: u8, width: u8) -> Self {
        Self {
            name,
            offset,
            width,
            kind: FieldKind::Uint,
        }
    }

    /// Enumerated field with labelled encodings
    pub const fn enumerated(
        name: &'static str,
        offset: u8,
        width: u8,
        labels: &'static [(u32, &'static str)],
    ) -> Self {
        Self {
            name,
            offset,
            width,
            kind: FieldKind::Enum(labels),
        }
    }

    /// Mask of the field in register position
    pub const fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            ((1u32 << self.width) - 1) << self.offset
        }
    }

    /// Extract the field from a raw register value
    pub const fn extract(&self, raw: u32) -> u32 {
        (raw & self.mask()) >> self.offset
    }

    /// Interpret an extracted value according to the field kind
    pub fn value(&self, raw: u32) -> FieldValue {
        let bits = self.extract(raw);
        match self.kind {
            FieldKind::Flag => FieldValue::Flag(bits != 0),
            FieldKind::Uint => FieldValue::Uint(bits),
            FieldKind::Enum(labels) => FieldValue::Enum {
                value: bits,
                label: labels
                    .iter()
                    .find(|(encoding, _)| *encoding == bits)
                    .map(|&(_, label)| label),
            },
        }
    }
}

/// Decoded value of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldValue {
    /// Boolean flag
    Flag(bool),
    /// Unsigned integer
    Uint(u32),
    /// Enumerated value and its label, if the encoding is known
    Enum {
        /// Raw field value
        value: u32,
        /// Label of the encoding
        label: Option<&'static str>,
    },
}

impl FieldValue {
    /// True for a set flag or any non-zero integer / enum value
    pub const fn is_nonzero(&self) -> bool {
        match *self {
            Self::Flag(set) => set,
            Self::Uint(value) | Self::Enum { value, .. } => value != 0,
        }
    }

    /// Field value as an integer
    pub const fn bits(&self) -> u32 {
        match *self {
            Self::Flag(set) => set as u32,
            Self::Uint(value) | Self::Enum { value, .. } => value,
        }
    }
}

/// Bit layout of one register
#[derive(Debug, PartialEq, Eq)]
pub struct Layout {
    /// Register name
    pub name: &'static str,
    /// Raw register width
    pub width: RegisterWidth,
    /// Named fields, lowest bit first by convention
    pub fields: &'static [Field],
}

impl Layout {
    /// Define a layout
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a `static`) if fields overlap,
    /// exceed the register width, or have zero width.
    pub const fn new(name: &'static str, width: RegisterWidth, fields: &'static [Field]) -> Self {
        let layout = Self {
            name,
            width,
            fields,
        };
        assert!(layout.is_well_formed(), "malformed bitfield layout");
        layout
    }

    /// Fields are non-empty, inside the register, and pairwise disjoint
    pub const fn is_well_formed(&self) -> bool {
        let mut covered = 0u32;
        let mut i = 0;
        while i < self.fields.len() {
            let field = &self.fields[i];
            if field.width == 0
                || field.offset as u32 + field.width as u32 > self.width.bits() as u32
            {
                return false;
            }
            if covered & field.mask() != 0 {
                return false;
            }
            covered |= field.mask();
            i += 1;
        }
        true
    }

    /// Bits owned by named fields
    pub const fn covered_mask(&self) -> u32 {
        let mut covered = 0u32;
        let mut i = 0;
        while i < self.fields.len() {
            covered |= self.fields[i].mask();
            i += 1;
        }
        covered
    }

    /// Bits no field claims
    pub const fn reserved_mask(&self) -> u32 {
        let all = match self.width {
            RegisterWidth::Bits16 => 0xFFFF,
            RegisterWidth::Bits32 => u32::MAX,
        };
        all & !self.covered_mask()
    }

    /// Field by exact name
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Field owning bit `bit`
    pub fn field_at(&self, bit: u8) -> Option<&'static Field> {
        self.fields
            .iter()
            .find(|field| bit >= field.offset && bit < field.offset + field.width)
    }
}

/// A register value paired with the layout that explains it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bitfield {
    raw: u32,
    layout: &'static Layout,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Bitfield {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}({=u32:#x})", self.layout.name, self.raw);
    }
}

impl Bitfield {
    /// Raw value, reserved bits included
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Layout used for decoding
    pub const fn layout(&self) -> &'static Layout {
        self.layout
    }

    /// Value of the field called `name`
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.layout.field(name).map(|field| field.value(self.raw))
    }

    /// True if the field called `name` exists and is non-zero
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| value.is_nonzero())
    }

    /// Integer value of the field called `name`
    pub fn uint(&self, name: &str) -> Option<u32> {
        self.get(name).map(|value| value.bits())
    }

    /// All fields with their decoded values, in layout order
    pub fn fields(&self) -> impl Iterator<Item = (&'static Field, FieldValue)> + '_ {
        self.layout
            .fields
            .iter()
            .map(move |field| (field, field.value(self.raw)))
    }

    /// Names of the fields that are non-zero
    pub fn active(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields()
            .filter(|(_, value)| value.is_nonzero())
            .map(|(field, _)| field.name)
    }

    /// True if any named field is non-zero
    pub fn any(&self) -> bool {
        self.raw & self.layout.covered_mask() != 0
    }

    /// Reserved bits as they were read
    pub const fn reserved_bits(&self) -> u32 {
        self.raw & self.layout.reserved_mask()
    }

    /// Copy with the field called `name` replaced by `value`
    ///
    /// All other bits, reserved ones included, are kept. Returns `None` for an
    /// unknown field or a value that does not fit the field width.
    pub fn with(self, name: &str, value: u32) -> Option<Self> {
        let field = self.layout.field(name)?;
        if value > field.mask() >> field.offset {
            return None;
        }
        Some(Self {
            raw: (self.raw & !field.mask()) | (value << field.offset),
            layout: self.layout,
        })
    }
}

/// Decode `raw` according to `layout`
///
/// Pure and total: bits beyond the layout width are discarded, everything else
/// is kept in [`Bitfield::raw`].
pub fn decode_bitfield(raw: u32, layout: &'static Layout) -> Bitfield {
    let raw = match layout.width {
        RegisterWidth::Bits16 => raw & 0xFFFF,
        RegisterWidth::Bits32 => raw,
    };
    Bitfield { raw, layout }
}

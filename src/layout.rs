//! Packed struct layouts for uniform and storage buffers.
//!
//! A [`StructLayout`] is described once by a sequence of [`StructLayout::add`]
//! calls, sealed with [`StructLayout::compile`] and then reused every frame to
//! pack values into a word array whose offsets match WGSL's native struct
//! layout for the supported field types.

pub mod words;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use glam::{UVec2, Vec2, Vec3};

use crate::error::{Result, SimError};
use words::{float_word, int_word, uint_word, words_to_bytes};

const UNIFORM_ROUNDING_WORDS: u32 = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayoutMode {
    /// Total size rounded up to a multiple of 16 words.
    Uniform,
    Storage,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldType {
    F32,
    U32,
    Vec2F,
    Vec2U,
    Vec3F,
}

impl FieldType {
    pub fn words(self) -> u32 {
        match self {
            FieldType::F32 | FieldType::U32 => 1,
            FieldType::Vec2F | FieldType::Vec2U => 2,
            FieldType::Vec3F => 3,
        }
    }

    pub fn alignment(self) -> u32 {
        match self {
            FieldType::F32 | FieldType::U32 => 1,
            FieldType::Vec2F | FieldType::Vec2U => 2,
            FieldType::Vec3F => 4,
        }
    }

    pub fn wgsl_name(self) -> &'static str {
        match self {
            FieldType::F32 => "f32",
            FieldType::U32 => "u32",
            FieldType::Vec2F => "vec2f",
            FieldType::Vec2U => "vec2u",
            FieldType::Vec3F => "vec3f",
        }
    }
}

impl FromStr for FieldType {
    type Err = SimError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "f32" => Ok(FieldType::F32),
            "u32" => Ok(FieldType::U32),
            "vec2f" => Ok(FieldType::Vec2F),
            "vec2u" => Ok(FieldType::Vec2U),
            "vec3f" => Ok(FieldType::Vec3F),
            other => Err(SimError::Configuration(format!("unsupported field type [{other}]"))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl_name())
    }
}

/// A value to be packed into a field.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FieldValue {
    F32(f32),
    U32(u32),
    I32(i32),
    Vec2F([f32; 2]),
    Vec2U([u32; 2]),
    Vec3F([f32; 3]),
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::F32(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::U32(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::I32(value)
    }
}

impl From<[f32; 2]> for FieldValue {
    fn from(value: [f32; 2]) -> Self {
        FieldValue::Vec2F(value)
    }
}

impl From<[u32; 2]> for FieldValue {
    fn from(value: [u32; 2]) -> Self {
        FieldValue::Vec2U(value)
    }
}

impl From<[f32; 3]> for FieldValue {
    fn from(value: [f32; 3]) -> Self {
        FieldValue::Vec3F(value)
    }
}

impl From<Vec2> for FieldValue {
    fn from(value: Vec2) -> Self {
        FieldValue::Vec2F(value.to_array())
    }
}

impl From<UVec2> for FieldValue {
    fn from(value: UVec2) -> Self {
        FieldValue::Vec2U(value.to_array())
    }
}

impl From<Vec3> for FieldValue {
    fn from(value: Vec3) -> Self {
        FieldValue::Vec3F(value.to_array())
    }
}

/// One layer of named values. Several layers are applied in order when
/// packing, later layers overriding earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    entries: HashMap<String, FieldValue>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.entries.insert(name.to_owned(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.entries.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub offset: u32,
    pub padding: bool,
}

/// Packed words ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedWords(Vec<u32>);

impl PackedWords {
    pub fn words(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        words_to_bytes(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct StructLayout {
    name: String,
    mode: LayoutMode,
    fields: Vec<Field>,
    padding_count: u32,
    total_words: u32,
    compiled: bool,
}

impl StructLayout {
    pub fn new(name: &str, mode: LayoutMode) -> Self {
        Self {
            name: name.to_owned(),
            mode,
            fields: Vec::new(),
            padding_count: 0,
            total_words: 0,
            compiled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Appends a field, preceded by as many single word padding fields as
    /// its alignment requires.
    pub fn add(&mut self, name: &str, ty: FieldType) -> Result<()> {
        if self.compiled {
            return Err(SimError::Configuration(format!(
                "cannot add [{name}] to sealed layout [{}]",
                self.name
            )));
        }
        if self.fields.iter().any(|field| field.name == name) {
            return Err(SimError::Configuration(format!(
                "duplicate field [{name}] in layout [{}]",
                self.name
            )));
        }

        while self.total_words % ty.alignment() != 0 {
            let padding_name = self.next_padding_name();
            self.push_field(padding_name, FieldType::F32, true);
        }

        self.push_field(name.to_owned(), ty, false);
        Ok(())
    }

    /// Like [`StructLayout::add`] with the type given by its WGSL name.
    pub fn add_named(&mut self, name: &str, type_name: &str) -> Result<()> {
        let ty = type_name.parse()?;
        self.add(name, ty)
    }

    /// Appends one explicit padding word, for storage records whose WGSL
    /// stride is larger than their last field.
    pub fn add_padding(&mut self) -> Result<()> {
        if self.compiled {
            return Err(SimError::Configuration(format!(
                "cannot add padding to sealed layout [{}]",
                self.name
            )));
        }
        let padding_name = self.next_padding_name();
        self.push_field(padding_name, FieldType::F32, true);
        Ok(())
    }

    /// `padding{n}` for the lowest unused counter value, skipping names a
    /// caller already gave to a field.
    fn next_padding_name(&mut self) -> String {
        loop {
            let name = format!("padding{}", self.padding_count);
            self.padding_count += 1;
            if !self.fields.iter().any(|field| field.name == name) {
                return name;
            }
        }
    }

    fn push_field(&mut self, name: String, ty: FieldType, padding: bool) {
        self.fields.push(Field {
            name,
            ty,
            offset: self.total_words,
            padding,
        });
        self.total_words += ty.words();
    }

    /// Seals the layout. Uniform layouts are rounded up to 16 words.
    pub fn compile(&mut self) -> Result<()> {
        if self.compiled {
            return Err(SimError::Configuration(format!("layout [{}] compiled twice", self.name)));
        }
        if self.mode == LayoutMode::Uniform {
            self.total_words = self.total_words.div_ceil(UNIFORM_ROUNDING_WORDS) * UNIFORM_ROUNDING_WORDS;
        }
        self.compiled = true;
        Ok(())
    }

    fn ensure_compiled(&self) -> Result<()> {
        if self.compiled {
            Ok(())
        } else {
            Err(SimError::Configuration(format!("layout [{}] used before compile", self.name)))
        }
    }

    /// Words in one packed record, including padding and rounding.
    pub fn total_words(&self) -> Result<u32> {
        self.ensure_compiled()?;
        Ok(self.total_words)
    }

    pub fn total_bytes(&self) -> Result<u64> {
        Ok(u64::from(self.total_words()?) * 4)
    }

    /// WGSL struct declaration, used as the insert text for this layout.
    pub fn shader_text(&self) -> Result<String> {
        self.ensure_compiled()?;
        let mut text = format!("struct {}\n{{\n", self.name);
        for field in &self.fields {
            text.push_str(&format!("{}: {},\n", field.name, field.ty));
        }
        text.push_str("};\n");
        Ok(text)
    }

    /// Packs one record. Every non padding field must be set by at least
    /// one layer.
    pub fn pack(&self, layers: &[&Values]) -> Result<PackedWords> {
        self.ensure_compiled()?;
        let mut out = vec![0u32; self.total_words as usize];
        self.pack_into(layers, &mut out)?;
        Ok(PackedWords(out))
    }

    /// Packs an array of records at a stride of [`StructLayout::total_words`].
    pub fn pack_many(&self, records: &[Values]) -> Result<PackedWords> {
        self.ensure_compiled()?;
        let stride = self.total_words as usize;
        let mut out = vec![0u32; stride * records.len()];
        for (record, chunk) in records.iter().zip(out.chunks_exact_mut(stride.max(1))) {
            self.pack_into(&[record], chunk)?;
        }
        Ok(PackedWords(out))
    }

    fn pack_into(&self, layers: &[&Values], out: &mut [u32]) -> Result<()> {
        for field in &self.fields {
            let resolved = layers.iter().rev().find_map(|layer| layer.get(&field.name));
            let Some(value) = resolved else {
                if field.padding {
                    continue;
                }
                return Err(SimError::Validation(format!(
                    "field [{}] of [{}] has never had its value set",
                    field.name, self.name
                )));
            };
            let offset = field.offset as usize;
            write_value(&mut out[offset..offset + field.ty.words() as usize], field, value)?;
        }
        Ok(())
    }
}

fn write_value(slot: &mut [u32], field: &Field, value: FieldValue) -> Result<()> {
    match (field.ty, value) {
        (FieldType::F32, FieldValue::F32(v)) => slot[0] = float_word(v),
        (FieldType::U32, FieldValue::U32(v)) => slot[0] = uint_word(v),
        (FieldType::U32, FieldValue::I32(v)) => slot[0] = int_word(v),
        (FieldType::Vec2F, FieldValue::Vec2F(v)) => {
            slot[0] = float_word(v[0]);
            slot[1] = float_word(v[1]);
        }
        (FieldType::Vec2U, FieldValue::Vec2U(v)) => {
            slot[0] = uint_word(v[0]);
            slot[1] = uint_word(v[1]);
        }
        (FieldType::Vec3F, FieldValue::Vec3F(v)) => {
            slot[0] = float_word(v[0]);
            slot[1] = float_word(v[1]);
            slot[2] = float_word(v[2]);
        }
        (ty, value) => {
            return Err(SimError::Validation(format!(
                "field [{}] of type {ty} cannot hold {value:?}",
                field.name
            )));
        }
    }
    Ok(())
}

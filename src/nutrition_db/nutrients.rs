//! The canonical list of nutrient fields.
//!
//! Every place that needs to know which nutrients exist (the persisted record layout, the
//! estimator's output schema, recipe aggregation and the macro/micro split of a profile)
//! reads it from [`NutrientField::ALL`].

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NutrientField {
    Calories,
    Protein,
    Fat,
    Carbs,
    Fiber,
    IronMg,
    CalciumMg,
    ZincMg,
    MagnesiumMg,
    PotassiumMg,
    SodiumMg,
    VitaminCMg,
    VitaminAMcg,
    VitaminDMcg,
    VitaminEMg,
    VitaminKMcg,
    ThiaminMg,
    RiboflavinMg,
    NiacinMg,
    VitaminB6Mg,
    FolateMcg,
    VitaminB12Mcg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutrientClass {
    Energy,
    Macro,
    Micro,
}

/// Fields an estimate must carry to be trusted without asking the estimator again.
pub const COMPLETENESS_FIELDS: [NutrientField; 4] = [
    NutrientField::VitaminCMg,
    NutrientField::VitaminAMcg,
    NutrientField::ThiaminMg,
    NutrientField::RiboflavinMg,
];

impl NutrientField {
    pub const ALL: [NutrientField; 22] = [
        NutrientField::Calories,
        NutrientField::Protein,
        NutrientField::Fat,
        NutrientField::Carbs,
        NutrientField::Fiber,
        NutrientField::IronMg,
        NutrientField::CalciumMg,
        NutrientField::ZincMg,
        NutrientField::MagnesiumMg,
        NutrientField::PotassiumMg,
        NutrientField::SodiumMg,
        NutrientField::VitaminCMg,
        NutrientField::VitaminAMcg,
        NutrientField::VitaminDMcg,
        NutrientField::VitaminEMg,
        NutrientField::VitaminKMcg,
        NutrientField::ThiaminMg,
        NutrientField::RiboflavinMg,
        NutrientField::NiacinMg,
        NutrientField::VitaminB6Mg,
        NutrientField::FolateMcg,
        NutrientField::VitaminB12Mcg,
    ];

    /// Key used in stored records, estimator output and tool payloads.
    pub fn key(self) -> &'static str {
        match self {
            NutrientField::Calories => "calories",
            NutrientField::Protein => "protein",
            NutrientField::Fat => "fat",
            NutrientField::Carbs => "carbs",
            NutrientField::Fiber => "fiber",
            NutrientField::IronMg => "iron_mg",
            NutrientField::CalciumMg => "calcium_mg",
            NutrientField::ZincMg => "zinc_mg",
            NutrientField::MagnesiumMg => "magnesium_mg",
            NutrientField::PotassiumMg => "potassium_mg",
            NutrientField::SodiumMg => "sodium_mg",
            NutrientField::VitaminCMg => "vitamin_c_mg",
            NutrientField::VitaminAMcg => "vitamin_a_mcg",
            NutrientField::VitaminDMcg => "vitamin_d_mcg",
            NutrientField::VitaminEMg => "vitamin_e_mg",
            NutrientField::VitaminKMcg => "vitamin_k_mcg",
            NutrientField::ThiaminMg => "thiamin_mg",
            NutrientField::RiboflavinMg => "riboflavin_mg",
            NutrientField::NiacinMg => "niacin_mg",
            NutrientField::VitaminB6Mg => "vitamin_b6_mg",
            NutrientField::FolateMcg => "folate_mcg",
            NutrientField::VitaminB12Mcg => "vitamin_b12_mcg",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.key() == key)
    }

    pub fn unit(self) -> &'static str {
        match self {
            NutrientField::Calories => "kcal",
            NutrientField::Protein | NutrientField::Fat | NutrientField::Carbs | NutrientField::Fiber => "g",
            NutrientField::VitaminAMcg
            | NutrientField::VitaminDMcg
            | NutrientField::VitaminKMcg
            | NutrientField::FolateMcg
            | NutrientField::VitaminB12Mcg => "mcg",
            _ => "mg",
        }
    }

    pub fn class(self) -> NutrientClass {
        match self {
            NutrientField::Calories => NutrientClass::Energy,
            NutrientField::Protein | NutrientField::Fat | NutrientField::Carbs | NutrientField::Fiber => {
                NutrientClass::Macro
            }
            _ => NutrientClass::Micro,
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            NutrientField::Calories => "Energy",
            NutrientField::Protein => "Protein",
            NutrientField::Fat => "Total fat",
            NutrientField::Carbs => "Carbohydrates",
            NutrientField::Fiber => "Dietary fiber",
            NutrientField::IronMg => "Iron",
            NutrientField::CalciumMg => "Calcium",
            NutrientField::ZincMg => "Zinc",
            NutrientField::MagnesiumMg => "Magnesium",
            NutrientField::PotassiumMg => "Potassium",
            NutrientField::SodiumMg => "Sodium",
            NutrientField::VitaminCMg => "Vitamin C",
            NutrientField::VitaminAMcg => "Vitamin A",
            NutrientField::VitaminDMcg => "Vitamin D",
            NutrientField::VitaminEMg => "Vitamin E",
            NutrientField::VitaminKMcg => "Vitamin K",
            NutrientField::ThiaminMg => "Thiamin (B1)",
            NutrientField::RiboflavinMg => "Riboflavin (B2)",
            NutrientField::NiacinMg => "Niacin (B3)",
            NutrientField::VitaminB6Mg => "Vitamin B6",
            NutrientField::FolateMcg => "Folate",
            NutrientField::VitaminB12Mcg => "Vitamin B12",
        }
    }

    /// Human description used in the estimator's JSON schema.
    pub fn description(self) -> String {
        let unit = match self.unit() {
            "kcal" => "kcal",
            "g" => "grams",
            "mg" => "milligrams",
            _ => "micrograms",
        };
        format!("{} in {} per 100g", self.display_name(), unit)
    }
}

impl fmt::Display for NutrientField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Nutrient amounts keyed by [`NutrientField`]. A missing key means "no data", which is
/// different from an explicit zero for queries like field-coverage statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NutrientValues(BTreeMap<NutrientField, f64>);

impl NutrientValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field present and set to zero.
    pub fn zeroed() -> Self {
        NutrientField::ALL.iter().map(|&field| (field, 0.0)).collect()
    }

    pub fn get(&self, field: NutrientField) -> Option<f64> {
        self.0.get(&field).copied()
    }

    pub fn value_or_zero(&self, field: NutrientField) -> f64 {
        self.get(field).unwrap_or(0.0)
    }

    pub fn set(&mut self, field: NutrientField, value: f64) {
        self.0.insert(field, value);
    }

    pub fn with(mut self, field: NutrientField, value: f64) -> Self {
        self.set(field, value);
        self
    }

    pub fn contains(&self, field: NutrientField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NutrientField, f64)> + '_ {
        self.0.iter().map(|(&field, &value)| (field, value))
    }

    pub fn is_complete(&self) -> bool {
        NutrientField::ALL.iter().all(|&field| self.contains(field))
    }

    pub fn missing(&self, fields: &[NutrientField]) -> Vec<NutrientField> {
        fields.iter().copied().filter(|&field| !self.contains(field)).collect()
    }

    pub fn negative_fields(&self) -> Vec<NutrientField> {
        self.iter().filter(|(_, value)| *value < 0.0).map(|(field, _)| field).collect()
    }

    /// Every canonical field multiplied by `factor`; absent fields become 0.
    pub fn scaled(&self, factor: f64) -> Self {
        NutrientField::ALL
            .iter()
            .map(|&field| (field, self.value_or_zero(field) * factor))
            .collect()
    }

    pub fn accumulate(&mut self, other: &NutrientValues) {
        for (field, value) in other.iter() {
            *self.0.entry(field).or_insert(0.0) += value;
        }
    }

    pub fn rounded(&self) -> Self {
        self.iter().map(|(field, value)| (field, round2(value))).collect()
    }

    /// Parses an estimator answer. The object must carry every canonical field as a number;
    /// anything partial is rejected as a whole. Extra keys are ignored.
    pub fn from_complete_json(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "nutrition estimate is not a JSON object".to_string())?;
        let mut values = NutrientValues::new();
        for field in NutrientField::ALL {
            let raw = object
                .get(field.key())
                .ok_or_else(|| format!("nutrition estimate is missing '{}'", field.key()))?;
            let number = raw
                .as_f64()
                .ok_or_else(|| format!("nutrition estimate has a non-numeric '{}': {}", field.key(), raw))?;
            values.set(field, number);
        }
        Ok(values)
    }
}

impl FromIterator<(NutrientField, f64)> for NutrientValues {
    fn from_iter<I: IntoIterator<Item = (NutrientField, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for NutrientValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.key(), &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NutrientValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NutrientVisitor;

        impl<'de> Visitor<'de> for NutrientVisitor {
            type Value = NutrientValues;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of nutrient keys to numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut values = NutrientValues::new();
                while let Some(key) = access.next_key::<String>()? {
                    let value: Value = access.next_value()?;
                    // Records carry descriptive keys too; only known numeric nutrients are kept.
                    if let (Some(field), Some(number)) = (NutrientField::from_key(&key), value.as_f64()) {
                        values.set(field, number);
                    }
                }
                Ok(values)
            }
        }

        deserializer.deserialize_map(NutrientVisitor)
    }
}

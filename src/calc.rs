use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

// Food, kg CO2 per kg.
pub const RED_MEAT_FACTOR: f64 = 27.0;
pub const POULTRY_FACTOR: f64 = 6.9;
pub const FISH_FACTOR: f64 = 5.4;
pub const DAIRY_FACTOR: f64 = 1.9;
pub const FRUIT_VEGETABLES_FACTOR: f64 = 0.5;
/// Multiplier applied to the imported share of the diet.
pub const IMPORTED_FOOD_MULTIPLIER: f64 = 1.1;
pub const WEEKS_PER_MONTH: f64 = 4.35;

// Purchases, kg CO2 per item.
pub const CLOTHING_FACTOR: f64 = 20.0;
pub const ELECTRONICS_FACTOR: f64 = 100.0;
pub const ONLINE_ORDER_FACTOR: f64 = 5.0;

// Transport, kg CO2 per km (per passenger km for public transport).
pub const GASOLINE_CAR_FACTOR: f64 = 0.192;
pub const DIESEL_CAR_FACTOR: f64 = 0.171;
pub const HYBRID_CAR_FACTOR: f64 = 0.106;
pub const ELECTRIC_CAR_FACTOR: f64 = 0.053;
pub const BUS_FACTOR: f64 = 0.105;
pub const RAIL_FACTOR: f64 = 0.041;

// Flights, kg CO2 per flight.
pub const SHORT_FLIGHT_FACTOR: f64 = 200.0;
pub const MEDIUM_FLIGHT_FACTOR: f64 = 600.0;
pub const LONG_FLIGHT_FACTOR: f64 = 1600.0;

pub const ELECTRICITY_FACTOR: f64 = 0.31;
pub const WATER_FACTOR: f64 = 0.344;
pub const WASTE_FACTOR: f64 = 0.58;
pub const COMPOSTING_FACTOR: f64 = 0.24;

pub const MONTHS_PER_YEAR: f64 = 12.0;

/// Realized share of a recommendation's potential impact once completed.
pub const EFFECTIVENESS_RANGE: RangeInclusive<f64> = 0.7..=1.2;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn check_quantity(field: &str, v: f64) -> Result<(), CalcError> {
    if !v.is_finite() || v < 0.0 {
        return Err(CalcError::new(
            "bad_params",
            format!("{} must be a non-negative number", field),
        ));
    }
    Ok(())
}

fn check_percent(field: &str, v: f64) -> Result<(), CalcError> {
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(CalcError::new(
            "bad_params",
            format!("{} must be between 0 and 100", field),
        ));
    }
    Ok(())
}

fn check_count(field: &str, v: i64) -> Result<(), CalcError> {
    if v < 0 {
        return Err(CalcError::new(
            "bad_params",
            format!("{} must not be negative", field),
        ));
    }
    Ok(())
}

/// Diet (kg per week) and purchases (per month, electronics per year).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ConsumptionDetail {
    pub red_meat_kg: f64,
    pub poultry_kg: f64,
    pub fish_kg: f64,
    pub dairy_kg: f64,
    pub fruit_vegetables_kg: f64,
    pub imported_food_percent: f64,
    pub new_clothing_items: i64,
    pub electronics_devices: i64,
    pub online_orders: i64,
}

impl ConsumptionDetail {
    pub fn validate(&self) -> Result<(), CalcError> {
        check_quantity("consumption.redMeatKg", self.red_meat_kg)?;
        check_quantity("consumption.poultryKg", self.poultry_kg)?;
        check_quantity("consumption.fishKg", self.fish_kg)?;
        check_quantity("consumption.dairyKg", self.dairy_kg)?;
        check_quantity("consumption.fruitVegetablesKg", self.fruit_vegetables_kg)?;
        check_percent("consumption.importedFoodPercent", self.imported_food_percent)?;
        check_count("consumption.newClothingItems", self.new_clothing_items)?;
        check_count("consumption.electronicsDevices", self.electronics_devices)?;
        check_count("consumption.onlineOrders", self.online_orders)
    }

    /// Monthly food emissions, scaled up for the imported share.
    pub fn food_emissions(&self) -> f64 {
        let weekly = self.red_meat_kg * RED_MEAT_FACTOR
            + self.poultry_kg * POULTRY_FACTOR
            + self.fish_kg * FISH_FACTOR
            + self.dairy_kg * DAIRY_FACTOR
            + self.fruit_vegetables_kg * FRUIT_VEGETABLES_FACTOR;
        let import_adjustment =
            1.0 + (self.imported_food_percent / 100.0) * (IMPORTED_FOOD_MULTIPLIER - 1.0);
        weekly * import_adjustment * WEEKS_PER_MONTH
    }

    pub fn purchase_emissions(&self) -> f64 {
        self.new_clothing_items as f64 * CLOTHING_FACTOR
            + self.electronics_devices as f64 * ELECTRONICS_FACTOR / MONTHS_PER_YEAR
            + self.online_orders as f64 * ONLINE_ORDER_FACTOR
    }

    pub fn emissions(&self) -> f64 {
        self.food_emissions() + self.purchase_emissions()
    }
}

/// Distances in km per month, flights per year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TransportDetail {
    pub gasoline_car_km: f64,
    pub diesel_car_km: f64,
    pub hybrid_car_km: f64,
    pub electric_car_km: f64,
    pub bus_km: f64,
    pub rail_km: f64,
    pub short_flights: i64,
    pub medium_flights: i64,
    pub long_flights: i64,
}

impl TransportDetail {
    pub fn validate(&self) -> Result<(), CalcError> {
        check_quantity("transport.gasolineCarKm", self.gasoline_car_km)?;
        check_quantity("transport.dieselCarKm", self.diesel_car_km)?;
        check_quantity("transport.hybridCarKm", self.hybrid_car_km)?;
        check_quantity("transport.electricCarKm", self.electric_car_km)?;
        check_quantity("transport.busKm", self.bus_km)?;
        check_quantity("transport.railKm", self.rail_km)?;
        check_count("transport.shortFlights", self.short_flights)?;
        check_count("transport.mediumFlights", self.medium_flights)?;
        check_count("transport.longFlights", self.long_flights)
    }

    pub fn private_vehicle_emissions(&self) -> f64 {
        self.gasoline_car_km * GASOLINE_CAR_FACTOR
            + self.diesel_car_km * DIESEL_CAR_FACTOR
            + self.hybrid_car_km * HYBRID_CAR_FACTOR
            + self.electric_car_km * ELECTRIC_CAR_FACTOR
    }

    pub fn public_transport_emissions(&self) -> f64 {
        self.bus_km * BUS_FACTOR + self.rail_km * RAIL_FACTOR
    }

    pub fn flight_emissions(&self) -> f64 {
        let yearly = self.short_flights as f64 * SHORT_FLIGHT_FACTOR
            + self.medium_flights as f64 * MEDIUM_FLIGHT_FACTOR
            + self.long_flights as f64 * LONG_FLIGHT_FACTOR;
        yearly / MONTHS_PER_YEAR
    }

    pub fn emissions(&self) -> f64 {
        self.private_vehicle_emissions()
            + self.public_transport_emissions()
            + self.flight_emissions()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatingType {
    Gas,
    Electric,
    Wood,
    HeatingOil,
    Biomass,
    #[default]
    None,
}

impl HeatingType {
    pub const ALL: [HeatingType; 6] = [
        Self::Gas,
        Self::Electric,
        Self::Wood,
        Self::HeatingOil,
        Self::Biomass,
        Self::None,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gas" => Some(Self::Gas),
            "electric" => Some(Self::Electric),
            "wood" => Some(Self::Wood),
            "heating_oil" => Some(Self::HeatingOil),
            "biomass" => Some(Self::Biomass),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Gas => "gas",
            Self::Electric => "electric",
            Self::Wood => "wood",
            Self::HeatingOil => "heating_oil",
            Self::Biomass => "biomass",
            Self::None => "none",
        }
    }

    /// kg CO2 per kWh of heat.
    pub fn factor(self) -> f64 {
        match self {
            Self::Gas => 0.20,
            Self::Electric => 0.31,
            Self::Wood => 0.02,
            Self::HeatingOil => 0.27,
            Self::Biomass => 0.01,
            Self::None => 0.0,
        }
    }
}

/// Household energy per month. `natural_gas_m3` is recorded but not costed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EnergyDetail {
    pub electricity_kwh: f64,
    pub renewable_percent: f64,
    pub natural_gas_m3: f64,
    pub water_m3: f64,
    pub heating_type: HeatingType,
    pub heating_consumption: f64,
}

impl EnergyDetail {
    pub fn validate(&self) -> Result<(), CalcError> {
        check_quantity("energy.electricityKwh", self.electricity_kwh)?;
        check_percent("energy.renewablePercent", self.renewable_percent)?;
        check_quantity("energy.naturalGasM3", self.natural_gas_m3)?;
        check_quantity("energy.waterM3", self.water_m3)?;
        check_quantity("energy.heatingConsumption", self.heating_consumption)
    }

    pub fn electricity_emissions(&self) -> f64 {
        let adjusted = ELECTRICITY_FACTOR * (1.0 - self.renewable_percent / 100.0);
        self.electricity_kwh * adjusted
    }

    pub fn heating_emissions(&self) -> f64 {
        self.heating_consumption * self.heating_type.factor()
    }

    pub fn water_emissions(&self) -> f64 {
        self.water_m3 * WATER_FACTOR
    }

    pub fn emissions(&self) -> f64 {
        self.electricity_emissions() + self.heating_emissions() + self.water_emissions()
    }
}

/// Household waste in kg per month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct WasteDetail {
    pub total_waste_kg: f64,
    pub composted_kg: f64,
}

impl WasteDetail {
    pub fn validate(&self) -> Result<(), CalcError> {
        check_quantity("waste.totalWasteKg", self.total_waste_kg)?;
        check_quantity("waste.compostedKg", self.composted_kg)
    }

    pub fn emissions(&self) -> f64 {
        let net = (self.total_waste_kg - self.composted_kg).max(0.0);
        net * WASTE_FACTOR
    }

    /// Avoided emissions from composting. Reported only, never subtracted.
    pub fn composting_reduction(&self) -> f64 {
        self.composted_kg * COMPOSTING_FACTOR
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FootprintDetails {
    pub consumption: Option<ConsumptionDetail>,
    pub transport: Option<TransportDetail>,
    pub energy: Option<EnergyDetail>,
    pub waste: Option<WasteDetail>,
}

impl FootprintDetails {
    pub fn validate(&self) -> Result<(), CalcError> {
        if let Some(d) = &self.consumption {
            d.validate()?;
        }
        if let Some(d) = &self.transport {
            d.validate()?;
        }
        if let Some(d) = &self.energy {
            d.validate()?;
        }
        if let Some(d) = &self.waste {
            d.validate()?;
        }
        Ok(())
    }

    /// Missing details contribute nothing.
    pub fn breakdown(&self, recycling_reduction: f64) -> FootprintBreakdown {
        FootprintBreakdown::new(
            self.consumption.as_ref().map(|d| d.emissions()).unwrap_or(0.0),
            self.transport.as_ref().map(|d| d.emissions()).unwrap_or(0.0),
            self.energy.as_ref().map(|d| d.emissions()).unwrap_or(0.0),
            self.waste.as_ref().map(|d| d.emissions()).unwrap_or(0.0),
            recycling_reduction,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintBreakdown {
    pub consumption: f64,
    pub transport: f64,
    pub energy: f64,
    pub waste: f64,
    pub recycling_reduction: f64,
    pub total: f64,
}

impl FootprintBreakdown {
    pub fn new(
        consumption: f64,
        transport: f64,
        energy: f64,
        waste: f64,
        recycling_reduction: f64,
    ) -> Self {
        let mut b = Self {
            consumption,
            transport,
            energy,
            waste,
            recycling_reduction,
            total: 0.0,
        };
        b.recompute_total();
        b
    }

    pub fn recompute_total(&mut self) -> f64 {
        self.total = self.consumption + self.transport + self.energy + self.waste
            - self.recycling_reduction;
        self.total
    }

    pub fn with_recycling_reduction(mut self, reduction: f64) -> Self {
        self.recycling_reduction = reduction;
        self.recompute_total();
        self
    }
}

pub fn average_footprint<I>(totals: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut n: usize = 0;
    let mut sum = 0.0;
    for t in totals {
        n += 1;
        sum += t;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageComparison {
    pub current_footprint: f64,
    pub personal_average: f64,
    pub difference: f64,
}

pub fn compare_with_average(current: f64, personal_average: f64) -> AverageComparison {
    AverageComparison {
        current_footprint: current,
        personal_average,
        difference: current - personal_average,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Consumption,
    Transport,
    Energy,
    Waste,
    Recycling,
    General,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Consumption,
        Self::Transport,
        Self::Energy,
        Self::Waste,
        Self::Recycling,
        Self::General,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == s)
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Transport => "transport",
            Self::Energy => "energy",
            Self::Waste => "waste",
            Self::Recycling => "recycling",
            Self::General => "general",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Consumption => "Consumption",
            Self::Transport => "Transport",
            Self::Energy => "Energy",
            Self::Waste => "Waste",
            Self::Recycling => "Recycling",
            Self::General => "General",
        }
    }
}

/// Category with the largest contribution; recycling counts as its negated
/// reduction. Ties keep the earlier category.
pub fn priority_category(b: &FootprintBreakdown) -> Category {
    let candidates = [
        (Category::Consumption, b.consumption),
        (Category::Transport, b.transport),
        (Category::Energy, b.energy),
        (Category::Waste, b.waste),
        (Category::Recycling, -b.recycling_reduction),
    ];
    let mut best = candidates[0];
    for c in &candidates[1..] {
        if c.1 > best.1 {
            best = *c;
        }
    }
    best.0
}

fn clamp_adjustment(x: f64) -> f64 {
    x.clamp(0.5, 2.0)
}

pub fn impact_adjustment(category: Category, latest: Option<&FootprintBreakdown>) -> f64 {
    let Some(b) = latest else {
        return 1.0;
    };
    match category {
        Category::Consumption => clamp_adjustment(b.consumption / 100.0),
        Category::Transport => clamp_adjustment(b.transport / 150.0),
        Category::Energy => clamp_adjustment(b.energy / 120.0),
        Category::Waste => clamp_adjustment(b.waste / 50.0),
        Category::Recycling => clamp_adjustment(30.0 / (b.recycling_reduction + 1.0)),
        Category::General => 1.0,
    }
}

pub fn adjusted_impact(
    potential_impact: f64,
    category: Category,
    latest: Option<&FootprintBreakdown>,
) -> f64 {
    potential_impact * impact_adjustment(category, latest)
}

/// `effectiveness` is expected to come from `EFFECTIVENESS_RANGE`.
pub fn realized_impact(potential_impact: f64, effectiveness: f64) -> f64 {
    potential_impact * effectiveness
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialType {
    Paper,
    Glass,
    Plastic,
    Metal,
    Organic,
    Electronic,
    Textile,
    Other,
}

impl MaterialType {
    pub const ALL: [MaterialType; 8] = [
        Self::Paper,
        Self::Glass,
        Self::Plastic,
        Self::Metal,
        Self::Organic,
        Self::Electronic,
        Self::Textile,
        Self::Other,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == s)
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Glass => "glass",
            Self::Plastic => "plastic",
            Self::Metal => "metal",
            Self::Organic => "organic",
            Self::Electronic => "electronic",
            Self::Textile => "textile",
            Self::Other => "other",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Paper => "Paper and Cardboard",
            Self::Glass => "Glass",
            Self::Plastic => "Plastic",
            Self::Metal => "Metal",
            Self::Organic => "Organic",
            Self::Electronic => "Electronic",
            Self::Textile => "Textile",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineValuation {
    pub economic_value: f64,
    pub co2_reduction: f64,
}

/// Unit mismatches between the line and the material are not converted.
pub fn value_recycled_line(quantity: f64, value_per_unit: f64, co2_factor: f64) -> LineValuation {
    LineValuation {
        economic_value: quantity * value_per_unit,
        co2_reduction: quantity * co2_factor,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecyclingTotals {
    pub total_kg: f64,
    pub economic_value: f64,
    pub co2_reduction: f64,
}

impl RecyclingTotals {
    pub fn add(&mut self, quantity: f64, line: LineValuation) {
        self.total_kg += quantity;
        self.economic_value += line.economic_value;
        self.co2_reduction += line.co2_reduction;
    }
}

pub fn recycling_totals<I>(lines: I) -> RecyclingTotals
where
    I: IntoIterator<Item = (f64, LineValuation)>,
{
    let mut totals = RecyclingTotals::default();
    for (quantity, line) in lines {
        totals.add(quantity, line);
    }
    totals
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Discarded,
}

impl AssignmentStatus {
    pub const ALL: [AssignmentStatus; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Discarded,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.code() == s)
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Discarded => "discarded",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Discarded => "Discarded",
        }
    }
}

use chrono::NaiveDate;

/// One cleaned observation for a target country.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub location: String,
    pub date: NaiveDate,
    pub new_cases: f64,
    pub people_vaccinated: f64,
    pub population: Option<f64>,
}

/// 7-day mean incidence per 100k inhabitants.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidenceRow {
    pub fecha: NaiveDate,
    pub pais: String,
    pub incidencia_7d: f64,
}

/// Week-over-week growth of reported cases, keyed by the week's last day.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthRow {
    pub semana_fin: NaiveDate,
    pub pais: String,
    pub casos_semana: f64,
    pub factor_crec_7d: f64,
}

//! Country and state lookup tables, loaded once at startup and shared
//! read-only for the lifetime of the process.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::errors::TedError;

/// A country's common name and its known aliases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountryEntry {
    pub common_name: String,
    pub aliases: Vec<String>,
}

/// A US state's postal code and its known aliases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateEntry {
    pub code: String,
    pub aliases: Vec<String>,
}

/// Immutable lookup tables consulted by the geocoder client (component C).
#[derive(Clone, Debug, Default)]
pub struct ReferenceTables {
    countries: HashMap<String, CountryEntry>,
    states: HashMap<String, StateEntry>,
}

impl ReferenceTables {
    /// Build a table directly from in-memory entries, bypassing the
    /// database. Used by other components' tests that need a populated
    /// `ReferenceTables` without a pool.
    #[cfg(test)]
    pub(crate) fn for_test(
        countries: &[(&str, &str, &[&str])],
        states: &[(&str, &str, &[&str])],
    ) -> ReferenceTables {
        let countries = countries
            .iter()
            .map(|(code, common_name, aliases)| {
                (
                    (*code).to_owned(),
                    CountryEntry {
                        common_name: (*common_name).to_owned(),
                        aliases: aliases.iter().map(|s| (*s).to_owned()).collect(),
                    },
                )
            })
            .collect();
        let states = states
            .iter()
            .map(|(state, code, aliases)| {
                (
                    (*state).to_owned(),
                    StateEntry {
                        code: (*code).to_owned(),
                        aliases: aliases.iter().map(|s| (*s).to_owned()).collect(),
                    },
                )
            })
            .collect();
        ReferenceTables { countries, states }
    }

    /// Load both tables from the database in one pass.
    pub async fn load(pool: &PgPool) -> Result<ReferenceTables, TedError> {
        let country_rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT code, common_name, aliases FROM countries")
                .fetch_all(pool)
                .await
                .map_err(|err| TedError::StoreError(err.into()))?;
        let mut countries = HashMap::new();
        for (code, common_name, aliases) in country_rows {
            countries.insert(
                code,
                CountryEntry {
                    common_name,
                    aliases: split_aliases(&aliases),
                },
            );
        }

        let state_rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT state, code, aliases FROM states")
                .fetch_all(pool)
                .await
                .map_err(|err| TedError::StoreError(err.into()))?;
        let mut states = HashMap::new();
        for (state, code, aliases) in state_rows {
            states.insert(
                state,
                StateEntry {
                    code,
                    aliases: split_aliases(&aliases),
                },
            );
        }

        Ok(ReferenceTables { countries, states })
    }

    /// Look up a country by its ESRI-supplied code (e.g. `"USA"`).
    pub fn country(&self, code: &str) -> Option<&CountryEntry> {
        self.countries.get(code)
    }

    /// Look up a state by its ESRI-supplied region name (e.g. `"California"`).
    pub fn state(&self, region: &str) -> Option<&StateEntry> {
        self.states.get(region)
    }
}

/// Aliases are stored comma-separated; split and trim them.
fn split_aliases(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_aliases() {
        assert_eq!(
            split_aliases("USA, United States of America,  America "),
            vec!["USA", "United States of America", "America"]
        );
        assert_eq!(split_aliases(""), Vec::<String>::new());
    }
}

//! Alert Assembler (component E).
//!
//! Given a trigger timestamp, pulls the tweet window, partitions it into
//! triggering and other tweets, geocodes the triggering set, elects a
//! consensus region, renders a plain-text alert, and hands it to the mail
//! dispatcher.

use chrono::{DateTime, Utc};
use deunicode::deunicode;
use futures::stream::{self, StreamExt};
use tracing::{instrument, warn};

use crate::{
    config::{Config, SetupConfig},
    errors::TedError,
    geocoders::GeocoderClient,
    mail,
    model::{AlertSpec, Consensus, GeocodeSource, GeocodedTweet, Tweet},
    region::{estimate_region, top_three_words},
    store::TweetStore,
};

/// How many geocode calls we issue concurrently for one alert.
const GEOCODE_CONCURRENCY: usize = 8;

/// Build and dispatch the alert for a trigger that fired at `trigger_time`.
#[instrument(level = "info", skip(store, geocoder, config), fields(trigger_time = %trigger_time))]
pub async fn assemble_and_dispatch(
    store: &TweetStore,
    geocoder: &GeocoderClient,
    config: &Config,
    trigger_time: DateTime<Utc>,
) -> Result<(), TedError> {
    let window_start = trigger_time - chrono::Duration::seconds(config.setup.sta_length);
    let tweets = store.tweets_in_window(window_start, trigger_time).await?;

    let (triggering_raw, other): (Vec<Tweet>, Vec<Tweet>) = tweets
        .into_iter()
        .partition(|tweet| is_triggering(tweet, &config.setup));

    let geocoded_tweets = geocode_triggering_tweets(geocoder, triggering_raw).await;

    let results: Vec<_> = geocoded_tweets.iter().map(|g| g.geocode.clone()).collect();
    let consensus = estimate_region(&results);
    let top_words = top_three_words(&results);

    let (subject_location, consensus_geocode) = match &consensus {
        Some(consensus) => {
            let geocode = geocoder.forward(&consensus.key).await.ok();
            (consensus.key.clone(), geocode)
        }
        None => ("Location undetermined".to_owned(), None),
    };

    let spec = AlertSpec {
        detection_time: trigger_time,
        subject_location,
        consensus,
        consensus_geocode,
        top_words,
        triggering_tweets: geocoded_tweets,
        other_tweets: other,
    };

    let body = render_alert(&spec, &config.mail.subject_tag, &config.mail.from);
    let filename = format!("email{}.txt", trigger_time.format("%Y-%m-%d_%H-%M-%S"));
    if let Err(err) = std::fs::write(&filename, &body) {
        warn!("could not write alert file {}: {}", filename, err);
    }

    mail::dispatch("/usr/sbin/sendmail", &config.mail.detection_list, &body).await
}

/// §4.E step 2: a tweet is *triggering* iff it's short, contains none of the
/// filter terms, and carries a location string.
fn is_triggering(tweet: &Tweet, setup: &SetupConfig) -> bool {
    let Some(location_string) = tweet.location_string() else {
        return false;
    };
    if location_string.trim().is_empty() {
        return false;
    }

    let transliterated = deunicode(&tweet.text);
    let num_words = transliterated.trim().split_whitespace().count();
    if num_words > setup.max_words {
        return false;
    }

    let has_filter_term = setup
        .filter_terms
        .split('|')
        .filter(|term| !term.is_empty())
        .any(|term| transliterated.contains(term));

    !has_filter_term
}

/// §4.E step 3: geocode each triggering tweet concurrently, keeping only
/// results with `quality >= 10`.
async fn geocode_triggering_tweets(
    geocoder: &GeocoderClient,
    tweets: Vec<Tweet>,
) -> Vec<GeocodedTweet> {
    stream::iter(tweets.into_iter().map(|tweet| {
        async move {
            match geocoder.geocode(&tweet.location_type).await {
                Ok((geocode, source)) if geocode.is_usable() => {
                    Some(GeocodedTweet { tweet, geocode, source })
                }
                Ok(_) => None,
                Err(err) => {
                    warn!("could not geocode tweet {}: {}", tweet.id, err);
                    None
                }
            }
        }
    }))
    .buffer_unordered(GEOCODE_CONCURRENCY)
    .filter_map(|result| async move { result })
    .collect()
    .await
}

/// Render the alert body per SPEC_FULL.md §6's layout.
fn render_alert(spec: &AlertSpec, subject_tag: &str, from: &str) -> String {
    const SEPARATOR: &str = "-------------";

    let mut out = String::new();

    out.push_str(&format!(
        "Subject: {} {} {}\n",
        spec.subject_location,
        spec.detection_time.format("%Y/%m/%d %H:%M:%S"),
        subject_tag
    ));
    out.push_str(&format!("From: {}\n", from));
    out.push('\n');

    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("Detection Time\n");
    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str(&format!(
        "{}\n\n",
        spec.detection_time.format("%Y/%m/%d %H:%M:%S")
    ));

    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("Possibly felt in\n");
    out.push_str(SEPARATOR);
    out.push('\n');
    match (&spec.consensus, &spec.consensus_geocode) {
        (Some(consensus), geocode) => {
            out.push_str(&format!(
                "{} {}\n",
                consensus.key,
                consensus.ratio_str()
            ));
            if let Some(geocode) = geocode {
                out.push_str(&format!("Coordinates: {}, {}\n", geocode.lat, geocode.lon));
                out.push_str(&format!("City: {}\n", geocode.l3));
                out.push_str(&format!("Level1: {}\n", geocode.l1));
                out.push_str(&format!("Country: {}\n", geocode.l0));
            }
            if !spec.top_words.is_empty() {
                let words = spec
                    .top_words
                    .iter()
                    .map(|(w, c)| format!("{} ({})", w, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("Top words: {}\n", words));
            }
        }
        (None, _) => {
            out.push_str("Location undetermined\n");
        }
    }
    out.push('\n');

    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("Triggering Tweets\n");
    out.push_str(SEPARATOR);
    out.push('\n');
    for geocoded in &spec.triggering_tweets {
        out.push_str(&format!(
            "TIME {}\n",
            geocoded.tweet.created_at.format("%Y/%m/%d %H:%M:%S")
        ));
        out.push_str(&format!(
            "UL: {}\n",
            geocoded.tweet.location_string().unwrap_or("")
        ));
        out.push_str(&format!(
            "GEO: {}, {} ({})\n",
            geocoded.geocode.lat,
            geocoded.geocode.lon,
            geocoded.source.letter()
        ));
        out.push_str(&format!("GEOS: {}\n", geocoded.geocode.geos));
        out.push_str(&format!("TXT: {}\n\n", geocoded.tweet.text));
    }

    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("Other Tweets\n");
    out.push_str(SEPARATOR);
    out.push('\n');
    for tweet in &spec.other_tweets {
        out.push_str(&format!("TIME {}\n", tweet.created_at.format("%Y/%m/%d %H:%M:%S")));
        out.push_str(&format!("UL: {}\n", tweet.location_string().unwrap_or("")));
        out.push_str(&format!("TXT: {}\n\n", tweet.text));
    }

    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str("Background\n");
    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str(FOOTER);

    out
}

/// Fixed informational footer appended to every alert (§6).
const FOOTER: &str = "\
This alert was generated automatically from a burst in the rate of short, \
geotagged tweets and has not been seismically verified.

For confirmed earthquake information, see:
  USGS:      https://earthquake.usgs.gov/earthquakes/map/
  EMSC:      https://www.emsc-csem.org/Earthquake/
  Chile:     https://www.sismologia.cl/
  Japan:     https://www.jma.go.jp/en/quake/
  Indonesia: https://www.bmkg.go.id/gempabumi/
  New Zealand: https://www.geonet.org.nz/earthquake

Location Estimate: the consensus of triggering tweets' geocoded locations,
reported as (matching tweets / total geocoded tweets).

Tweets:
  UL   - the user-supplied location string.
  GEO  - our best estimate of the latitude and longitude, with a source letter:
         (A) reverse-geocoded from a precise tweet geotag
         (C) forward-geocoded from the user-supplied location string
  GEOS - the resolved city, region, country.
  TXT  - the tweet text.
";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::model::{GeocodeResult, LocationType};

    fn setup() -> SetupConfig {
        SetupConfig {
            bin_length: 60,
            lta_length: 1800,
            sta_length: 60,
            m: 1.0,
            b: 0.0,
            detection_threshold: 3.0,
            trigger_reset: 600,
            bin_load_delay: 0,
            filter_terms: "lorem|ipsum".to_owned(),
            max_words: 10,
        }
    }

    fn tweet(text: &str, location_string: Option<&str>) -> Tweet {
        Tweet {
            id: 1,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            text: text.to_owned(),
            location_type: location_string
                .map(|s| LocationType::LocationString(s.to_owned()))
                .unwrap_or(LocationType::None),
        }
    }

    #[test]
    fn s7_filtered_tweet_is_other() {
        let t = tweet("ipsum dolor sit", Some("Napa, CA"));
        assert!(!is_triggering(&t, &setup()));
    }

    #[test]
    fn filter_term_match_is_case_sensitive() {
        // filter_terms = "lorem|ipsum" (lowercase) must not catch a
        // differently-cased occurrence; the original `get_tweets` does a
        // plain `in` check with no case-folding.
        let t = tweet("Lorem dolor sit", Some("Napa, CA"));
        assert!(is_triggering(&t, &setup()));
    }

    #[test]
    fn short_tweet_with_location_triggers() {
        let t = tweet("did you feel that", Some("Napa, CA"));
        assert!(is_triggering(&t, &setup()));
    }

    #[test]
    fn tweet_without_location_is_other() {
        let t = tweet("did you feel that", None);
        assert!(!is_triggering(&t, &setup()));
    }

    #[test]
    fn long_tweet_is_other() {
        let t = tweet(
            "this is a very long tweet that exceeds the configured word limit by quite a lot",
            Some("Napa, CA"),
        );
        assert!(!is_triggering(&t, &setup()));
    }

    #[test]
    fn renders_undetermined_when_no_consensus() {
        let spec = AlertSpec {
            detection_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            subject_location: "Location undetermined".to_owned(),
            consensus: None,
            consensus_geocode: None,
            top_words: vec![],
            triggering_tweets: vec![],
            other_tweets: vec![],
        };
        let body = render_alert(&spec, "[TED]", "ted@example.com");
        assert!(body.contains("Location undetermined"));
        assert!(body.contains("Subject: Location undetermined"));
    }

    #[test]
    fn renders_consensus_with_ratio() {
        let spec = AlertSpec {
            detection_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            subject_location: "Napa, California, United States".to_owned(),
            consensus: Some(Consensus {
                key: "Napa, California, United States".to_owned(),
                count: 3,
                total: 5,
            }),
            consensus_geocode: None,
            top_words: vec![("napa".to_owned(), 3)],
            triggering_tweets: vec![],
            other_tweets: vec![],
        };
        let body = render_alert(&spec, "[TED]", "ted@example.com");
        assert!(body.contains("(3/5)"));
        assert!(body.contains("Top words: napa (3)"));
    }

    #[test]
    fn renders_consensus_city_level1_country_breakdown() {
        let spec = AlertSpec {
            detection_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            subject_location: "Napa, California, United States".to_owned(),
            consensus: Some(Consensus {
                key: "Napa, California, United States".to_owned(),
                count: 3,
                total: 5,
            }),
            consensus_geocode: Some(GeocodeResult {
                l3: "Napa".to_owned(),
                l1: "California".to_owned(),
                l0: "United States".to_owned(),
                ..GeocodeResult::empty("Napa, California, United States")
            }),
            top_words: vec![],
            triggering_tweets: vec![],
            other_tweets: vec![],
        };
        let body = render_alert(&spec, "[TED]", "ted@example.com");
        assert!(body.contains("City: Napa"));
        assert!(body.contains("Level1: California"));
        assert!(body.contains("Country: United States"));
    }

    #[test]
    fn renders_geo_line_from_lat_lon_not_loc_string() {
        let geocode = GeocodeResult {
            loc_string: "napa ca".to_owned(),
            lat: "38.297".to_owned(),
            lon: "-122.286".to_owned(),
            quality: 17,
            l0: "United States".to_owned(),
            l1: "California".to_owned(),
            l3: "Napa".to_owned(),
            geos: "Napa, California, United States".to_owned(),
        };
        let spec = AlertSpec {
            detection_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            subject_location: "Napa, California, United States".to_owned(),
            consensus: None,
            consensus_geocode: None,
            top_words: vec![],
            triggering_tweets: vec![GeocodedTweet {
                tweet: tweet("did you feel that", Some("Napa, CA")),
                geocode,
                source: GeocodeSource::Forward,
            }],
            other_tweets: vec![],
        };
        let body = render_alert(&spec, "[TED]", "ted@example.com");
        assert!(body.contains("GEO: 38.297, -122.286 (C)"));
        assert!(!body.contains("GEO: napa ca"));
    }
}

//! Person query, mapping, and transformer. `movies` is already
//! aggregated server-side into a list of film-work ids the person
//! participates in (§4.2).

use serde_json::{json, Map, Value};
use sync_core::{Document, PipelineConfig, Row, Transformer};

pub const QUERY: &str = "\
SELECT
    p.id AS person_id,
    p.full_name,
    p.modified,
    COALESCE(movies_agg.movies, '[]'::jsonb) AS movies
FROM content.person p
LEFT JOIN LATERAL (
    SELECT jsonb_agg(DISTINCT pfw.film_work_id) AS movies
    FROM content.person_film_work pfw
    WHERE pfw.person_id = p.id
) movies_agg ON true
WHERE p.modified > $1
ORDER BY p.modified ASC
LIMIT $2";

pub fn index_mapping() -> Value {
    json!({
        "settings": { "refresh_interval": "1s" },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "full_name": { "type": "text" },
                "movies": { "type": "keyword" }
            }
        }
    })
}

pub fn pipeline_config(index_name: String, default_sync_time: String, sleep_secs: u64, batch_size: u32) -> PipelineConfig {
    PipelineConfig {
        name: "persons".to_string(),
        watermark_key: "last_synced_time_persons".to_string(),
        index_name,
        index_mapping: index_mapping(),
        default_sync_time,
        default_sleep_time: std::time::Duration::from_secs(sleep_secs),
        batch_size,
    }
}

pub struct PersonTransformer {
    index_name: String,
}

impl PersonTransformer {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }
}

impl Transformer for PersonTransformer {
    fn transform(&self, rows: Vec<Row>) -> Box<dyn Iterator<Item = Document> + Send> {
        let index_name = self.index_name.clone();
        let iter = rows.into_iter().map(move |row| {
            let id = row.get_str("person_id").unwrap_or_default().to_string();

            let mut source = Map::new();
            source.insert("id".to_string(), row.get("person_id").cloned().unwrap_or(Value::Null));
            source.insert("full_name".to_string(), row.get("full_name").cloned().unwrap_or(Value::Null));
            source.insert("movies".to_string(), row.get("movies").cloned().unwrap_or(Value::Array(vec![])));

            Document::new(index_name.clone(), id, Value::Object(source))
        });
        Box::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_person_id_full_name_and_aggregated_movies() {
        let Value::Object(map) = json!({
            "person_id": "p-1",
            "full_name": "X",
            "movies": ["film-1", "film-2"],
        }) else {
            unreachable!()
        };
        let row = Row::new(map);

        let transformer = PersonTransformer::new("persons");
        let docs: Vec<Document> = transformer.transform(vec![row]).collect();
        assert_eq!(docs[0].id, "p-1");
        assert_eq!(docs[0].source["full_name"], json!("X"));
        assert_eq!(docs[0].source["movies"], json!(["film-1", "film-2"]));
    }

    #[test]
    fn missing_movies_field_yields_empty_array_not_null() {
        let Value::Object(map) = json!({"person_id": "p-2", "full_name": "Y"}) else {
            unreachable!()
        };
        let row = Row::new(map);

        let transformer = PersonTransformer::new("persons");
        let docs: Vec<Document> = transformer.transform(vec![row]).collect();
        assert_eq!(docs[0].source["movies"], json!([]));
    }
}

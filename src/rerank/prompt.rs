use super::RerankCandidate;

/// Build the scoring prompt for one batch.
///
/// Every candidate is listed as `N. Table: <id>` followed by its description,
/// and the model is asked for a JSON array covering all of them.
pub fn build_prompt(query: &str, context: &str, batch: &[RerankCandidate]) -> String {
    let mut prompt = String::with_capacity(512 + batch.len() * 160);

    prompt.push_str("You are ranking database tables by how useful they are for answering a search query.\n\n");
    prompt.push_str(&format!("Task: {}\n", context.trim()));
    prompt.push_str(&format!("Query: {}\n\n", query.trim()));
    prompt.push_str("Candidates:\n");

    for (i, candidate) in batch.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. Table: {}\n   Description: {}\n",
            i + 1,
            candidate.id,
            single_line(&candidate.description)
        ));
    }

    prompt.push_str(&format!(
        "\nGive each of the {} tables above a relevance score between 0.0 and 1.0, \
         where 1.0 means the table directly answers the query and 0.0 means it is unrelated.\n",
        batch.len()
    ));
    prompt.push_str(
        "Respond with ONLY a JSON array, one object per table, using the exact table names:\n",
    );
    prompt.push_str("[{\"table_name\": \"<name>\", \"score\": <number>}]\n");
    prompt.push_str("Do not add explanations or any text outside the array.");

    prompt
}

/// Collapse newlines so one description cannot break the candidate list
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, description: &str) -> RerankCandidate {
        RerankCandidate::new(id, description)
    }

    #[test]
    fn test_prompt_lists_every_candidate() {
        let batch = vec![
            candidate("school_enrolment", "Pupils enrolled per school"),
            candidate("road_traffic", "Vehicle counts\nper road segment"),
        ];
        let prompt = build_prompt("how many pupils", "Find tables", &batch);

        assert!(prompt.contains("Query: how many pupils"));
        assert!(prompt.contains("Task: Find tables"));
        assert!(prompt.contains("1. Table: school_enrolment\n   Description: Pupils enrolled per school"));
        assert!(prompt.contains("2. Table: road_traffic\n   Description: Vehicle counts per road segment"));
        assert!(prompt.contains("each of the 2 tables"));
        assert_eq!(prompt.matches(". Table: ").count(), 2);
    }

    #[test]
    fn test_prompt_asks_for_json_array() {
        let prompt = build_prompt("q", "c", &[candidate("a", "b")]);
        assert!(prompt.contains("\"table_name\""));
        assert!(prompt.contains("\"score\""));
        assert!(prompt.contains("ONLY a JSON array"));
    }
}

// SQL query constants for repositories

/// SQL query fragments for the tasks table
pub mod task_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, name, description, task_type, schedule,
        enabled, paused, retry_policy, config, workflow,
        last_fire_time, next_fire_time, created_at, updated_at"#;
}

/// SQL query fragments for the executions table
pub mod execution_queries {
    /// Empty JSON defaults keep rows written by older versions decodable
    pub const SELECT_ALL_COLUMNS: &str = r#"id, task_id, parent_execution_id, trigger_source,
        status, start_time, end_time, duration_seconds, retry_count, next_attempt_at,
        COALESCE(progress, '{}'::jsonb) AS progress,
        is_paused, terminate_requested, result, error_message,
        COALESCE(attempts, '[]'::jsonb) AS attempts,
        created_at"#;

    pub const IN_FLIGHT_STATUSES: &str = "('pending', 'running', 'paused')";
}

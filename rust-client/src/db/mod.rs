pub mod star_schema_queries;

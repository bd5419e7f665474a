use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Chunks table - individually uploaded audio fragments
#[derive(Iden)]
pub enum Chunks {
    Table,
    ConversationId,
    ChunkIndex,
    Speaker,
    StoragePath,
    ByteSize,
    MimeType,
    Container,
    Status,
    UploadedAtMs,
}

/// Combination jobs table - one row per reconstruction attempt
#[derive(Iden)]
pub enum CombinationJobs {
    Table,
    Id,
    ConversationId,
    Speaker,
    Status,
    Container,
    CombinedFilePath,
    TotalChunks,
    ErrorMessage,
    StartedAtMs,
    CompletedAtMs,
    HeartbeatAtMs,
}

/// Silence analyses table - cached scan results keyed by file path
#[derive(Iden)]
pub enum SilenceAnalyses {
    Table,
    FilePath,
    Segments,
    DurationSeconds,
    ThresholdDb,
    MinSilenceDurationSeconds,
    AnalyzedAtMs,
}

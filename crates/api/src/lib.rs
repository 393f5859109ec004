pub mod client;

pub use client::{
    FamilyStatusResponse, ReportedStatus, SafetyApiClient, SafetyApiError,
    WorkerLocationResponse,
};

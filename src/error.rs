use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Redirect, Responder};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not logged in")]
    Unauthorized,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(password_hash::Error),

    #[error("storage poisoned")]
    Poisoned,
}

impl From<password_hash::Error> for Error {
    fn from(e: password_hash::Error) -> Self {
        Error::PasswordHash(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::Unauthorized => Redirect::to("/login").respond_to(req),
            other => {
                error!("{} {} failed: {other}", req.method(), req.uri());
                Err(Status::InternalServerError)
            }
        }
    }
}

pub mod sendmail;

pub use sendmail::SendmailTransport;

pub mod wallet_connection;

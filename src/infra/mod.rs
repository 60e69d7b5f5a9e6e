pub mod italo;

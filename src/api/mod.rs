pub mod scs_dto;

mod donation_detail;
mod donation_list;
mod my_donations;

pub use donation_detail::DonationDetailView;
pub use donation_list::DonationListView;
pub use my_donations::MyDonationsView;
